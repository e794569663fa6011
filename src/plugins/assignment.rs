//! Assignment submissions and grading.
//!
//! The `submissions` row is the only record of assignment state; progress
//! views read it through [`summaries_in`].

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::{self, SchoolError};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::authz;
use crate::plugins::curriculum;
use crate::plugins::enrollment;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    Graded,
    /// Re-submitted after a grade that allowed it; awaiting regrade.
    Resubmit,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Graded => "graded",
            Self::Resubmit => "resubmit",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(Self::Submitted),
            "graded" => Ok(Self::Graded),
            "resubmit" => Ok(Self::Resubmit),
            other => Err(SchoolError::BadRequest(format!(
                "unknown submission status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub enrollment_id: String,
    pub module_number: u32,
    pub assignment_id: String,
    pub content: String,
    pub attachments: Vec<String>,
    pub status: SubmissionStatus,
    pub grade: Option<u32>,
    pub feedback: Option<String>,
    pub graded_by: Option<String>,
    pub graded_at: Option<String>,
    pub resubmission_allowed: bool,
    pub submitted_at: String,
}

/// Read-side projection embedded in progress summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentSummary {
    pub submission_id: String,
    pub module_number: u32,
    pub assignment_id: String,
    pub status: SubmissionStatus,
    pub grade: Option<u32>,
    pub submitted_at: String,
    pub graded_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub module_number: u32,
    pub assignment_id: String,
    pub content: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GradeRequest {
    pub grade: u32,
    pub feedback: Option<String>,
    pub resubmission_allowed: bool,
}

const SUBMISSION_COLUMNS: &str = "id, enrollment_id, module_number, assignment_id, content, attachments, status, grade, feedback, graded_by, graded_at, resubmission_allowed, submitted_at";

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    let attachments: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(Submission {
        id: row.get(0)?,
        enrollment_id: row.get(1)?,
        module_number: row.get(2)?,
        assignment_id: row.get(3)?,
        content: row.get(4)?,
        attachments: serde_json::from_str(&attachments).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        status: status.parse::<SubmissionStatus>().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unrecognized submission status '{}'", status).into(),
            )
        })?,
        grade: row.get(7)?,
        feedback: row.get(8)?,
        graded_by: row.get(9)?,
        graded_at: row.get(10)?,
        resubmission_allowed: row.get(11)?,
        submitted_at: row.get(12)?,
    })
}

fn get_submission_in(conn: &Connection, submission_id: &str) -> Result<Submission, SchoolError> {
    conn.query_row(
        &format!("SELECT {} FROM submissions WHERE id = ?1", SUBMISSION_COLUMNS),
        params![submission_id],
        submission_from_row,
    )
    .optional()?
    .ok_or_else(|| SchoolError::NotFound(format!("submission '{}' not found", submission_id)))
}

pub(crate) fn list_submissions_in(conn: &Connection, enrollment_id: &str) -> Result<Vec<Submission>, SchoolError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM submissions WHERE enrollment_id = ?1 ORDER BY module_number, assignment_id",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![enrollment_id], submission_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn summaries_in(conn: &Connection, enrollment_id: &str) -> Result<Vec<AssignmentSummary>, SchoolError> {
    Ok(list_submissions_in(conn, enrollment_id)?
        .into_iter()
        .map(|s| AssignmentSummary {
            submission_id: s.id,
            module_number: s.module_number,
            assignment_id: s.assignment_id,
            status: s.status,
            grade: s.grade,
            submitted_at: s.submitted_at,
            graded_at: s.graded_at,
        })
        .collect())
}

fn broker_for(store: &Store) -> (DbBroker, std::path::PathBuf) {
    (DbBroker::new(&store.root), db::school_db_path(&store.root))
}

/// `submitAssignment`.
///
/// A graded submission that allowed resubmission is overwritten in place
/// and moves to `resubmit`; any other repeat is rejected.
pub fn submit_assignment(
    store: &Store,
    student_id: &str,
    submission: NewSubmission,
) -> Result<Submission, SchoolError> {
    if submission.content.trim().is_empty() {
        return Err(SchoolError::BadRequest(
            "submission content must not be empty".to_string(),
        ));
    }

    let (broker, db_path) = broker_for(store);
    let saved = broker.with_tx(&db_path, student_id, "assignment.submit", |conn| {
        let enrollment = enrollment::latest_enrollment_in(conn, student_id)?;
        if !enrollment.status.accepts_progress() {
            return Err(SchoolError::BadRequest(format!(
                "enrollment '{}' is {} and no longer accepts submissions",
                enrollment.id, enrollment.status
            )));
        }
        let module = curriculum::get_active_module_in(conn, submission.module_number)?;
        match module.assignment.as_ref() {
            Some(a) if a.id == submission.assignment_id => {}
            _ => {
                return Err(SchoolError::BadRequest(format!(
                    "module {} has no assignment '{}'",
                    submission.module_number, submission.assignment_id
                )));
            }
        }

        let attachments = serde_json::to_string(&submission.attachments)?;
        let now = time::now_epoch_z();
        let existing: Option<Submission> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM submissions WHERE enrollment_id = ?1 AND module_number = ?2 AND assignment_id = ?3",
                    SUBMISSION_COLUMNS
                ),
                params![enrollment.id, submission.module_number, submission.assignment_id],
                submission_from_row,
            )
            .optional()?;

        match existing {
            None => {
                let id = time::prefixed_id("SUB");
                conn.execute(
                    "INSERT INTO submissions(id, enrollment_id, module_number, assignment_id, content, attachments, status, submitted_at)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, 'submitted', ?7)",
                    params![
                        id,
                        enrollment.id,
                        submission.module_number,
                        submission.assignment_id,
                        submission.content,
                        attachments,
                        now
                    ],
                )
                .map_err(|e| error::conflict_on_constraint(e, "assignment already submitted"))?;
                get_submission_in(conn, &id)
            }
            Some(prev) if prev.status == SubmissionStatus::Graded && prev.resubmission_allowed => {
                let updated = conn.execute(
                    "UPDATE submissions
                     SET content = ?1, attachments = ?2, status = 'resubmit', resubmission_allowed = 0, submitted_at = ?3
                     WHERE id = ?4 AND status = 'graded' AND resubmission_allowed = 1",
                    params![submission.content, attachments, now, prev.id],
                )?;
                if updated == 0 {
                    return Err(SchoolError::Conflict(format!(
                        "submission '{}' changed concurrently; retry",
                        prev.id
                    )));
                }
                get_submission_in(conn, &prev.id)
            }
            Some(prev) => Err(SchoolError::BadRequest(format!(
                "assignment '{}' for module {} was already submitted ({}); resubmission is not allowed",
                submission.assignment_id, submission.module_number, prev.status
            ))),
        }
    })?;

    tracing::info!(
        submission_id = %saved.id,
        enrollment_id = %saved.enrollment_id,
        module = saved.module_number,
        status = saved.status.as_str(),
        "assignment submitted"
    );
    Ok(saved)
}

/// `gradeAssignment`. Batch staff or a manager of the owning organization.
pub fn grade_assignment(
    store: &Store,
    grader: &str,
    submission_id: &str,
    request: GradeRequest,
) -> Result<Submission, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let graded = broker.with_tx(&db_path, grader, "assignment.grade", |conn| {
        let submission = get_submission_in(conn, submission_id)?;
        let owner = enrollment::get_enrollment_in(conn, &submission.enrollment_id)?;
        let org_id = enrollment::owning_org_in(conn, &owner)?;
        authz::require_school_staff_in(
            conn,
            grader,
            org_id.as_deref(),
            owner.batch_id.as_deref(),
            &format!("grade submission '{}'", submission_id),
        )?;

        if request.grade > 100 {
            return Err(SchoolError::BadRequest(format!(
                "grade must be within 0..=100, got {}",
                request.grade
            )));
        }

        conn.execute(
            "UPDATE submissions
             SET status = 'graded', grade = ?1, feedback = ?2, graded_by = ?3, graded_at = ?4, resubmission_allowed = ?5
             WHERE id = ?6",
            params![
                request.grade,
                request.feedback,
                grader,
                time::now_epoch_z(),
                request.resubmission_allowed,
                submission_id
            ],
        )?;
        get_submission_in(conn, submission_id)
    })?;

    tracing::info!(
        submission_id,
        grader,
        grade = request.grade,
        resubmission_allowed = request.resubmission_allowed,
        "assignment graded"
    );
    Ok(graded)
}

pub fn get_submission(store: &Store, submission_id: &str) -> Result<Submission, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "assignment.get", |conn| {
        get_submission_in(conn, submission_id)
    })
}

/// Submissions of one enrollment. NotFound when the enrollment does not exist.
pub fn list_submissions(store: &Store, enrollment_id: &str) -> Result<Vec<Submission>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "assignment.list", |conn| {
        enrollment::get_enrollment_in(conn, enrollment_id)?;
        list_submissions_in(conn, enrollment_id)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "assignment",
        "version": "0.1.0",
        "description": "Assignment submission and grading",
        "commands": [
            { "name": "submit", "parameters": ["module", "assignment", "content", "attachment"] },
            { "name": "grade", "parameters": ["id", "grade", "feedback", "allow_resubmission"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "list", "parameters": ["enrollment"] }
        ],
        "storage": ["school.db"]
    })
}
