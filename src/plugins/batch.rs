//! Batches: time-boxed cohorts scoped to one organization.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::{self, SchoolError};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::authz;
use crate::plugins::organization;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Draft,
    RegistrationOpen,
    InProgress,
    Completed,
    Graduated,
    Archived,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::RegistrationOpen => "registration_open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Graduated => "graduated",
            Self::Archived => "archived",
        }
    }

    /// Statuses a new enrollment may join.
    pub fn accepts_enrollment(&self) -> bool {
        matches!(self, Self::RegistrationOpen | Self::InProgress)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "draft" => Ok(Self::Draft),
            "registration_open" => Ok(Self::RegistrationOpen),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "graduated" => Ok(Self::Graduated),
            "archived" => Ok(Self::Archived),
            other => Err(SchoolError::BadRequest(format!(
                "unknown batch status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Batch {
    pub id: String,
    pub org_id: String,
    pub batch_number: u32,
    pub name: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub status: BatchStatus,
    pub principal_id: Option<String>,
    pub teachers: Vec<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewBatch {
    pub org_id: String,
    pub batch_number: u32,
    pub name: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub principal_id: Option<String>,
}

const BATCH_COLUMNS: &str = "id, org_id, batch_number, name, start_date, end_date, status, principal_id, created_by, created_at, updated_at";

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    let status: String = row.get(6)?;
    Ok(Batch {
        id: row.get(0)?,
        org_id: row.get(1)?,
        batch_number: row.get(2)?,
        name: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        status: status.parse::<BatchStatus>().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unrecognized batch status '{}'", status).into(),
            )
        })?,
        principal_id: row.get(7)?,
        teachers: Vec::new(),
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn load_teachers_in(conn: &Connection, batch: &mut Batch) -> Result<(), SchoolError> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM batch_teachers WHERE batch_id = ?1 ORDER BY added_at, user_id")?;
    batch.teachers = stmt
        .query_map(params![batch.id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(())
}

pub fn get_batch_in(conn: &Connection, batch_id: &str) -> Result<Batch, SchoolError> {
    let mut batch = conn
        .query_row(
            &format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS),
            params![batch_id],
            batch_from_row,
        )
        .optional()?
        .ok_or_else(|| SchoolError::NotFound(format!("batch '{}' not found", batch_id)))?;
    load_teachers_in(conn, &mut batch)?;
    Ok(batch)
}

/// Most recently started batch that is taking enrollments, optionally
/// restricted to one organization.
pub fn open_batch_in(conn: &Connection, org_id: Option<&str>) -> Result<Option<Batch>, SchoolError> {
    let sql = format!(
        "SELECT {} FROM batches
         WHERE status IN ('registration_open', 'in_progress') AND (?1 IS NULL OR org_id = ?1)
         ORDER BY start_date DESC, created_at DESC, id DESC LIMIT 1",
        BATCH_COLUMNS
    );
    let batch = conn
        .query_row(&sql, params![org_id], batch_from_row)
        .optional()?;
    match batch {
        Some(mut batch) => {
            load_teachers_in(conn, &mut batch)?;
            Ok(Some(batch))
        }
        None => Ok(None),
    }
}

fn broker_for(store: &Store) -> (DbBroker, std::path::PathBuf) {
    (DbBroker::new(&store.root), db::school_db_path(&store.root))
}

/// `createBatch`. Requires a management role on the organization; the
/// batch number must be unused within that organization.
pub fn create_batch(store: &Store, issuer: &str, new_batch: NewBatch) -> Result<Batch, SchoolError> {
    let name = new_batch.name.trim().to_string();
    if name.is_empty() {
        return Err(SchoolError::BadRequest("batch name is required".to_string()));
    }
    let start = time::parse_date("start_date", &new_batch.start_date)?;
    let end = new_batch
        .end_date
        .as_deref()
        .map(|raw| time::parse_date("end_date", raw))
        .transpose()?;
    if let Some(end) = end {
        if end < start {
            return Err(SchoolError::BadRequest(format!(
                "end_date {} is before start_date {}",
                end, start
            )));
        }
    }

    let (broker, db_path) = broker_for(store);
    let batch = broker.with_tx(&db_path, issuer, "batch.create", |conn| {
        organization::get_organization_in(conn, &new_batch.org_id)?;
        authz::require_manage_in(conn, issuer, &new_batch.org_id, "create batches")?;

        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM batches WHERE org_id = ?1 AND batch_number = ?2",
            params![new_batch.org_id, new_batch.batch_number],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(SchoolError::BadRequest(format!(
                "batch number {} already exists in organization '{}'",
                new_batch.batch_number, new_batch.org_id
            )));
        }

        let now = time::now_epoch_z();
        let batch = Batch {
            id: time::prefixed_id("BAT"),
            org_id: new_batch.org_id.clone(),
            batch_number: new_batch.batch_number,
            name: name.clone(),
            start_date: start.to_string(),
            end_date: end.map(|d| d.to_string()),
            status: BatchStatus::RegistrationOpen,
            principal_id: new_batch.principal_id.clone(),
            teachers: Vec::new(),
            created_by: issuer.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        conn.execute(
            &format!(
                "INSERT INTO batches({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                BATCH_COLUMNS
            ),
            params![
                batch.id,
                batch.org_id,
                batch.batch_number,
                batch.name,
                batch.start_date,
                batch.end_date,
                batch.status.as_str(),
                batch.principal_id,
                batch.created_by,
                batch.created_at,
                batch.updated_at,
            ],
        )
        .map_err(|e| {
            error::conflict_on_constraint(
                e,
                &format!("batch number {} was taken concurrently", batch.batch_number),
            )
        })?;
        Ok(batch)
    })?;

    tracing::info!(batch_id = %batch.id, org_id = %batch.org_id, batch_number = batch.batch_number, issuer, "batch created");
    Ok(batch)
}

pub fn get_batch(store: &Store, batch_id: &str) -> Result<Batch, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "batch.get", |conn| get_batch_in(conn, batch_id))
}

/// The batch a scope-less enrollment would join, if any.
pub fn open_batch_for(store: &Store, org_id: Option<&str>) -> Result<Option<Batch>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "batch.open", |conn| open_batch_in(conn, org_id))
}

pub fn list_batches(
    store: &Store,
    org_id: Option<&str>,
    status: Option<BatchStatus>,
) -> Result<Vec<Batch>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "batch.list", |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batches
             WHERE (?1 IS NULL OR org_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY start_date DESC, batch_number DESC",
            BATCH_COLUMNS
        ))?;
        let mut batches = stmt
            .query_map(params![org_id, status.map(|s| s.as_str())], batch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for batch in &mut batches {
            load_teachers_in(conn, batch)?;
        }
        Ok(batches)
    })
}

fn require_batch_manager_in(
    conn: &Connection,
    actor: &str,
    batch_id: &str,
    action: &str,
) -> Result<Batch, SchoolError> {
    let batch = get_batch_in(conn, batch_id)?;
    authz::require_manage_in(conn, actor, &batch.org_id, action)?;
    Ok(batch)
}

/// Set any status. There is no enforced transition graph.
pub fn update_batch_status(
    store: &Store,
    actor: &str,
    batch_id: &str,
    status: BatchStatus,
) -> Result<Batch, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let batch = broker.with_tx(&db_path, actor, "batch.status", |conn| {
        require_batch_manager_in(conn, actor, batch_id, "change batch status")?;
        conn.execute(
            "UPDATE batches SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), time::now_epoch_z(), batch_id],
        )?;
        get_batch_in(conn, batch_id)
    })?;
    tracing::info!(batch_id, status = status.as_str(), actor, "batch status changed");
    Ok(batch)
}

pub fn set_principal(
    store: &Store,
    actor: &str,
    batch_id: &str,
    principal_id: Option<&str>,
) -> Result<Batch, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "batch.principal", |conn| {
        require_batch_manager_in(conn, actor, batch_id, "assign the batch principal")?;
        conn.execute(
            "UPDATE batches SET principal_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![principal_id, time::now_epoch_z(), batch_id],
        )?;
        get_batch_in(conn, batch_id)
    })
}

pub fn add_teacher(
    store: &Store,
    actor: &str,
    batch_id: &str,
    teacher_id: &str,
) -> Result<Batch, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "batch.add_teacher", |conn| {
        require_batch_manager_in(conn, actor, batch_id, "add batch teachers")?;
        conn.execute(
            "INSERT OR IGNORE INTO batch_teachers(batch_id, user_id, added_at) VALUES(?1, ?2, ?3)",
            params![batch_id, teacher_id, time::now_epoch_z()],
        )?;
        get_batch_in(conn, batch_id)
    })
}

pub fn remove_teacher(
    store: &Store,
    actor: &str,
    batch_id: &str,
    teacher_id: &str,
) -> Result<Batch, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "batch.remove_teacher", |conn| {
        require_batch_manager_in(conn, actor, batch_id, "remove batch teachers")?;
        let removed = conn.execute(
            "DELETE FROM batch_teachers WHERE batch_id = ?1 AND user_id = ?2",
            params![batch_id, teacher_id],
        )?;
        if removed == 0 {
            return Err(SchoolError::NotFound(format!(
                "'{}' does not teach batch '{}'",
                teacher_id, batch_id
            )));
        }
        get_batch_in(conn, batch_id)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "batch",
        "version": "0.1.0",
        "description": "Cohorts scoped to one organization",
        "commands": [
            { "name": "create", "parameters": ["org", "number", "name", "start", "end", "principal"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "list", "parameters": ["org", "status"] },
            { "name": "status", "parameters": ["id", "status"] },
            { "name": "principal", "parameters": ["id", "user"] },
            { "name": "add-teacher", "parameters": ["id", "user"] },
            { "name": "remove-teacher", "parameters": ["id", "user"] },
            { "name": "roster", "parameters": ["id"] },
            { "name": "open", "parameters": ["org"] }
        ],
        "storage": ["school.db"]
    })
}
