//! Shared timestamp, id and envelope helpers.

use crate::core::error::SchoolError;
use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", Utc::now().timestamp())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Entity id such as `ENR_01J...`. ULIDs keep ids sortable by creation time.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parses an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, SchoolError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        SchoolError::BadRequest(format!(
            "{} must be a YYYY-MM-DD date, got '{}'",
            field, raw
        ))
    })
}

/// Response envelope shared by every CLI command.
///
/// `extra` must be a JSON object; its keys are merged next to the envelope
/// fields and never overwrite them.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut fields = match extra {
        JsonValue::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    fields.insert("envelope_version".into(), "1.0.0".into());
    fields.insert("ts".into(), now_epoch_z().into());
    fields.insert("event_id".into(), new_event_id().into());
    fields.insert("cmd".into(), cmd.into());
    fields.insert("status".into(), status.into());
    JsonValue::Object(fields)
}
