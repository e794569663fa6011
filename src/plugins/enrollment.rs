//! Enrollment lifecycle: idempotent enroll, lookup, and terminal exits.
//!
//! A student holds at most one open enrollment: anything not yet dropped,
//! withdrawn or graduated, `completed` included. The check and the insert
//! share one IMMEDIATE transaction and a partial unique index backs them
//! up, so a lost race surfaces as `Conflict` instead of a second open row.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::{self, SchoolError};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::authz;
use crate::plugins::batch;
use crate::plugins::curriculum;
use crate::plugins::organization;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    InProgress,
    Active,
    Completed,
    Dropped,
    Withdrawn,
    Graduated,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::InProgress => "in_progress",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
            Self::Withdrawn => "withdrawn",
            Self::Graduated => "graduated",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Enrolled | Self::Active | Self::InProgress)
    }

    /// Counts toward the one-open-enrollment rule. Lessons, quizzes and
    /// submissions may still be recorded.
    pub fn accepts_progress(&self) -> bool {
        self.is_active() || *self == Self::Completed
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dropped | Self::Withdrawn | Self::Graduated)
    }

    pub fn is_certifiable(&self) -> bool {
        matches!(self, Self::Completed | Self::Graduated)
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "enrolled" => Ok(Self::Enrolled),
            "in_progress" => Ok(Self::InProgress),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "dropped" => Ok(Self::Dropped),
            "withdrawn" => Ok(Self::Withdrawn),
            "graduated" => Ok(Self::Graduated),
            other => Err(SchoolError::BadRequest(format!(
                "unknown enrollment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub org_id: Option<String>,
    pub batch_id: Option<String>,
    pub status: EnrollmentStatus,
    pub current_module: u32,
    pub total_modules: u32,
    pub enrolled_at: String,
    pub completed_at: Option<String>,
    pub ended_at: Option<String>,
    pub certificate_number: Option<String>,
    pub certificate_issued_by: Option<String>,
    pub certificate_issued_at: Option<String>,
    pub certificate_issue_date: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct EnrollOutcome {
    pub enrollment: Enrollment,
    pub already_enrolled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EnrollRequest {
    pub student_id: String,
    pub student_name: Option<String>,
    pub org_id: Option<String>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrollmentFilter {
    pub student_id: Option<String>,
    pub org_id: Option<String>,
    pub batch_id: Option<String>,
    pub status: Option<EnrollmentStatus>,
}

/// Non-graduated exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Dropped,
    Withdrawn,
}

impl EndReason {
    fn status(&self) -> EnrollmentStatus {
        match self {
            Self::Dropped => EnrollmentStatus::Dropped,
            Self::Withdrawn => EnrollmentStatus::Withdrawn,
        }
    }
}

pub(crate) const ENROLLMENT_COLUMNS: &str = "id, student_id, student_name, org_id, batch_id, status, current_module, total_modules, enrolled_at, completed_at, ended_at, certificate_number, certificate_issued_by, certificate_issued_at, certificate_issue_date, updated_at";

pub(crate) fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
    let status: String = row.get(5)?;
    Ok(Enrollment {
        id: row.get(0)?,
        student_id: row.get(1)?,
        student_name: row.get(2)?,
        org_id: row.get(3)?,
        batch_id: row.get(4)?,
        status: status.parse::<EnrollmentStatus>().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unrecognized enrollment status '{}'", status).into(),
            )
        })?,
        current_module: row.get(6)?,
        total_modules: row.get(7)?,
        enrolled_at: row.get(8)?,
        completed_at: row.get(9)?,
        ended_at: row.get(10)?,
        certificate_number: row.get(11)?,
        certificate_issued_by: row.get(12)?,
        certificate_issued_at: row.get(13)?,
        certificate_issue_date: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

pub fn get_enrollment_in(conn: &Connection, enrollment_id: &str) -> Result<Enrollment, SchoolError> {
    conn.query_row(
        &format!("SELECT {} FROM enrollments WHERE id = ?1", ENROLLMENT_COLUMNS),
        params![enrollment_id],
        enrollment_from_row,
    )
    .optional()?
    .ok_or_else(|| SchoolError::NotFound(format!("enrollment '{}' not found", enrollment_id)))
}

/// The student's enrollment that is neither ended nor graduated, if any.
pub fn open_enrollment_in(conn: &Connection, student_id: &str) -> Result<Option<Enrollment>, SchoolError> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {} FROM enrollments
                 WHERE student_id = ?1 AND status IN ('enrolled', 'active', 'in_progress', 'completed')
                 ORDER BY enrolled_at DESC, id DESC LIMIT 1",
                ENROLLMENT_COLUMNS
            ),
            params![student_id],
            enrollment_from_row,
        )
        .optional()?;
    Ok(found)
}

/// The enrollment that lesson, quiz and assignment events apply to.
pub fn progressable_enrollment_in(conn: &Connection, student_id: &str) -> Result<Enrollment, SchoolError> {
    open_enrollment_in(conn, student_id)?.ok_or_else(|| {
        SchoolError::NotFound(format!("student '{}' is not enrolled", student_id))
    })
}

/// Open enrollment if any, otherwise the most recent one of any status.
pub fn latest_enrollment_in(conn: &Connection, student_id: &str) -> Result<Enrollment, SchoolError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM enrollments WHERE student_id = ?1
             ORDER BY CASE WHEN status IN ('enrolled', 'active', 'in_progress', 'completed') THEN 0 ELSE 1 END,
                      enrolled_at DESC, id DESC
             LIMIT 1",
            ENROLLMENT_COLUMNS
        ),
        params![student_id],
        enrollment_from_row,
    )
    .optional()?
    .ok_or_else(|| {
        SchoolError::NotFound(format!("student '{}' is not enrolled", student_id))
    })
}

fn broker_for(store: &Store) -> (DbBroker, std::path::PathBuf) {
    (DbBroker::new(&store.root), db::school_db_path(&store.root))
}

/// `enroll(student, organization?, batch?)`.
///
/// Returns the existing open enrollment with `already_enrolled = true`
/// instead of failing. A completed enrollment awaiting its certificate
/// counts as open. Without an explicit batch the most recently started
/// open batch (within the organization, when given) is joined, if any.
pub fn enroll(store: &Store, request: EnrollRequest) -> Result<EnrollOutcome, SchoolError> {
    let student_id = request.student_id.trim().to_string();
    if student_id.is_empty() {
        return Err(SchoolError::BadRequest("student id is required".to_string()));
    }

    let (broker, db_path) = broker_for(store);
    let outcome = broker.with_tx(&db_path, &student_id, "enrollment.enroll", |conn| {
        if let Some(existing) = open_enrollment_in(conn, &student_id)? {
            return Ok(EnrollOutcome {
                enrollment: existing,
                already_enrolled: true,
            });
        }

        if let Some(org_id) = request.org_id.as_deref() {
            organization::get_organization_in(conn, org_id)?;
        }

        let chosen_batch = match request.batch_id.as_deref() {
            Some(batch_id) => {
                let b = batch::get_batch_in(conn, batch_id)?;
                if !b.status.accepts_enrollment() {
                    return Err(SchoolError::BadRequest(format!(
                        "batch '{}' is {} and not accepting enrollments",
                        b.id, b.status
                    )));
                }
                if let Some(org_id) = request.org_id.as_deref() {
                    if b.org_id != org_id {
                        return Err(SchoolError::BadRequest(format!(
                            "batch '{}' belongs to organization '{}', not '{}'",
                            b.id, b.org_id, org_id
                        )));
                    }
                }
                Some(b)
            }
            None => batch::open_batch_in(conn, request.org_id.as_deref())?,
        };

        let org_id = request
            .org_id
            .clone()
            .or_else(|| chosen_batch.as_ref().map(|b| b.org_id.clone()));

        let total_modules = curriculum::count_active_in(conn)?;
        if total_modules == 0 {
            return Err(SchoolError::BadRequest(
                "the curriculum has no active modules; import one before enrolling students".to_string(),
            ));
        }

        let now = time::now_epoch_z();
        let enrollment = Enrollment {
            id: time::prefixed_id("ENR"),
            student_id: student_id.clone(),
            student_name: request
                .student_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(student_id.as_str())
                .to_string(),
            org_id,
            batch_id: chosen_batch.map(|b| b.id),
            status: EnrollmentStatus::Active,
            current_module: 1,
            total_modules,
            enrolled_at: now.clone(),
            completed_at: None,
            ended_at: None,
            certificate_number: None,
            certificate_issued_by: None,
            certificate_issued_at: None,
            certificate_issue_date: None,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO enrollments(id, student_id, student_name, org_id, batch_id, status, current_module, total_modules, enrolled_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                enrollment.id,
                enrollment.student_id,
                enrollment.student_name,
                enrollment.org_id,
                enrollment.batch_id,
                enrollment.status.as_str(),
                enrollment.current_module,
                enrollment.total_modules,
                enrollment.enrolled_at,
                enrollment.updated_at,
            ],
        )
        .map_err(|e| {
            error::conflict_on_constraint(
                e,
                &format!("student '{}' already has an active enrollment", student_id),
            )
        })?;

        Ok(EnrollOutcome {
            enrollment,
            already_enrolled: false,
        })
    })?;

    if outcome.already_enrolled {
        tracing::debug!(enrollment_id = %outcome.enrollment.id, student = %student_id, "already enrolled");
    } else {
        tracing::info!(
            enrollment_id = %outcome.enrollment.id,
            student = %student_id,
            batch_id = ?outcome.enrollment.batch_id,
            total_modules = outcome.enrollment.total_modules,
            "student enrolled"
        );
    }
    Ok(outcome)
}

pub fn get_enrollment(store: &Store, enrollment_id: &str) -> Result<Enrollment, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "enrollment.get", |conn| {
        get_enrollment_in(conn, enrollment_id)
    })
}

pub fn current_enrollment(store: &Store, student_id: &str) -> Result<Enrollment, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, student_id, "enrollment.current", |conn| {
        latest_enrollment_in(conn, student_id)
    })
}

pub fn list_enrollments(store: &Store, filter: &EnrollmentFilter) -> Result<Vec<Enrollment>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "enrollment.list", |conn| {
        list_enrollments_in(conn, filter)
    })
}

pub(crate) fn list_enrollments_in(
    conn: &Connection,
    filter: &EnrollmentFilter,
) -> Result<Vec<Enrollment>, SchoolError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM enrollments
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR org_id = ?2)
           AND (?3 IS NULL OR batch_id = ?3)
           AND (?4 IS NULL OR status = ?4)
         ORDER BY enrolled_at, id",
        ENROLLMENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(
            params![
                filter.student_id,
                filter.org_id,
                filter.batch_id,
                filter.status.map(|s| s.as_str()),
            ],
            enrollment_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Enrollments of one batch. NotFound when the batch does not exist.
pub fn batch_roster(store: &Store, batch_id: &str) -> Result<Vec<Enrollment>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "enrollment.roster", |conn| {
        batch::get_batch_in(conn, batch_id)?;
        list_enrollments_in(
            conn,
            &EnrollmentFilter {
                batch_id: Some(batch_id.to_string()),
                ..EnrollmentFilter::default()
            },
        )
    })
}

/// Owning organization: explicit, else the batch's.
pub(crate) fn owning_org_in(conn: &Connection, enrollment: &Enrollment) -> Result<Option<String>, SchoolError> {
    if enrollment.org_id.is_some() {
        return Ok(enrollment.org_id.clone());
    }
    match enrollment.batch_id.as_deref() {
        Some(batch_id) => Ok(Some(batch::get_batch_in(conn, batch_id)?.org_id)),
        None => Ok(None),
    }
}

/// Move an enrollment to `dropped` or `withdrawn`.
///
/// A student may withdraw their own enrollment; anything else needs batch
/// staff or a management role on the owning organization.
pub fn end_enrollment(
    store: &Store,
    actor: &str,
    enrollment_id: &str,
    reason: EndReason,
) -> Result<Enrollment, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let ended = broker.with_tx(&db_path, actor, "enrollment.end", |conn| {
        let enrollment = get_enrollment_in(conn, enrollment_id)?;
        let self_withdrawal = enrollment.student_id == actor && reason == EndReason::Withdrawn;
        if !self_withdrawal {
            let org_id = owning_org_in(conn, &enrollment)?;
            authz::require_school_staff_in(
                conn,
                actor,
                org_id.as_deref(),
                enrollment.batch_id.as_deref(),
                &format!("mark enrollment '{}' {}", enrollment_id, reason.status()),
            )?;
        }
        if enrollment.status.is_terminal() {
            return Err(SchoolError::BadRequest(format!(
                "enrollment '{}' is already {}",
                enrollment_id, enrollment.status
            )));
        }

        let now = time::now_epoch_z();
        let updated = conn.execute(
            "UPDATE enrollments SET status = ?1, ended_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![reason.status().as_str(), now, enrollment_id, enrollment.status.as_str()],
        )?;
        if updated == 0 {
            return Err(SchoolError::Conflict(format!(
                "enrollment '{}' changed concurrently; retry",
                enrollment_id
            )));
        }
        get_enrollment_in(conn, enrollment_id)
    })?;

    tracing::info!(enrollment_id, actor, status = ended.status.as_str(), "enrollment ended");
    Ok(ended)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "enrollment",
        "version": "0.1.0",
        "description": "Foundation School enrollment lifecycle",
        "commands": [
            { "name": "enroll", "parameters": ["name", "org", "batch"] },
            { "name": "enrollment get", "parameters": ["id"] },
            { "name": "enrollment list", "parameters": ["student", "org", "batch", "status"] },
            { "name": "enrollment end", "parameters": ["id", "reason"] }
        ],
        "storage": ["school.db"]
    })
}
