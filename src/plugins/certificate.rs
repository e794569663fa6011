//! Graduation: certificate numbering, rendering and public verification.
//!
//! Issuance is the only path to `graduated`. The number is drawn from a
//! per-year counter inside the issuing transaction and written with
//! `COALESCE`, so once assigned it never changes.

use crate::core::broker::DbBroker;
use crate::core::config;
use crate::core::db;
use crate::core::error::SchoolError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::authz;
use crate::plugins::enrollment::{self, Enrollment, EnrollmentStatus};
use crate::plugins::organization;
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

const FALLBACK_ORGANIZATION_NAME: &str = "Foundation School";

#[derive(Debug, Clone, Serialize)]
pub struct CertificateIssue {
    pub enrollment: Enrollment,
    pub certificate_number: String,
    pub issue_date: String,
    pub already_issued: bool,
}

/// Input handed to a [`CertificateRenderer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRenderRequest {
    pub student_name: String,
    pub issue_date: String,
    pub organization_name: String,
    pub location_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedCertificate {
    pub certificate_number: String,
    pub media_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Public view returned by verification; no user ids.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateRecord {
    pub certificate_number: String,
    pub student_name: String,
    pub issue_date: String,
    pub organization_name: String,
    pub status: EnrollmentStatus,
    pub verification_code: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RenderFailure(pub String);

/// Produces the certificate artifact. Failures never affect issuance.
pub trait CertificateRenderer {
    fn media_type(&self) -> &'static str;
    fn render(&self, request: &CertificateRenderRequest) -> Result<Vec<u8>, RenderFailure>;
}

/// Default renderer: a self-contained landscape SVG.
#[derive(Debug, Default, Clone)]
pub struct SvgCertificateRenderer;

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

impl CertificateRenderer for SvgCertificateRenderer {
    fn media_type(&self) -> &'static str {
        "image/svg+xml"
    }

    fn render(&self, request: &CertificateRenderRequest) -> Result<Vec<u8>, RenderFailure> {
        if request.student_name.trim().is_empty() {
            return Err(RenderFailure("student name is empty".to_string()));
        }
        let svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="1100" height="850" viewBox="0 0 1100 850">
  <rect x="20" y="20" width="1060" height="810" fill="none" stroke="#7a5c1e" stroke-width="6"/>
  <text x="550" y="200" font-size="48" text-anchor="middle" font-family="serif">Certificate of Completion</text>
  <text x="550" y="300" font-size="24" text-anchor="middle" font-family="serif">This certifies that</text>
  <text x="550" y="390" font-size="44" text-anchor="middle" font-family="serif">{student}</text>
  <text x="550" y="470" font-size="24" text-anchor="middle" font-family="serif">has completed the Foundation School of {org}</text>
  <text x="550" y="520" font-size="20" text-anchor="middle" font-family="serif">{location}</text>
  <text x="550" y="700" font-size="20" text-anchor="middle" font-family="serif">Issued {date}</text>
</svg>
"##,
            student = xml_escape(&request.student_name),
            org = xml_escape(&request.organization_name),
            location = xml_escape(&request.location_name),
            date = xml_escape(&request.issue_date),
        );
        Ok(svg.into_bytes())
    }
}

pub fn format_certificate_number(prefix: &str, year: i32, sequence: u64) -> String {
    format!("{}-{}-{:06}", prefix, year, sequence)
}

/// Short SHA-256 digest binding the number to the holder and date.
pub fn verification_code(certificate_number: &str, student_id: &str, issue_date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(certificate_number.as_bytes());
    hasher.update(b"|");
    hasher.update(student_id.as_bytes());
    hasher.update(b"|");
    hasher.update(issue_date.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_ascii_uppercase()
}

fn next_sequence_in(conn: &Connection, counter: &str) -> Result<u64, SchoolError> {
    let value: i64 = conn.query_row(
        "INSERT INTO counters(name, value) VALUES(?1, 1)
         ON CONFLICT(name) DO UPDATE SET value = value + 1
         RETURNING value",
        params![counter],
        |row| row.get(0),
    )?;
    Ok(value as u64)
}

fn broker_for(store: &Store) -> (DbBroker, std::path::PathBuf) {
    (DbBroker::new(&store.root), db::school_db_path(&store.root))
}

/// `issueCertificate(enrollment, issuer, issueDate?)`.
///
/// The staff check runs before the status check, so an outsider learns
/// nothing about the enrollment.
pub fn issue_certificate(
    store: &Store,
    issuer: &str,
    enrollment_id: &str,
    issue_date: Option<&str>,
) -> Result<CertificateIssue, SchoolError> {
    let prefix = config::load_config(&store.root)?.school.certificate_prefix;

    let (broker, db_path) = broker_for(store);
    let issue = broker.with_tx(&db_path, issuer, "certificate.issue", |conn| {
        let current = enrollment::get_enrollment_in(conn, enrollment_id)?;
        let org_id = enrollment::owning_org_in(conn, &current)?;
        authz::require_school_staff_in(
            conn,
            issuer,
            org_id.as_deref(),
            current.batch_id.as_deref(),
            &format!("issue a certificate for enrollment '{}'", enrollment_id),
        )?;
        let requested_date = issue_date
            .map(|raw| time::parse_date("issue_date", raw))
            .transpose()?
            .unwrap_or_else(time::today);
        if !current.status.is_certifiable() {
            return Err(SchoolError::BadRequest(format!(
                "enrollment '{}' is {}; a certificate needs a completed enrollment",
                enrollment_id, current.status
            )));
        }

        if current.status == EnrollmentStatus::Graduated {
            if let (Some(number), Some(date)) = (
                current.certificate_number.clone(),
                current.certificate_issue_date.clone(),
            ) {
                return Ok(CertificateIssue {
                    enrollment: current,
                    certificate_number: number,
                    issue_date: date,
                    already_issued: true,
                });
            }
        }

        let year = requested_date.year();
        let sequence = next_sequence_in(conn, &format!("certificate:{}", year))?;
        let number = format_certificate_number(&prefix, year, sequence);
        let now = time::now_epoch_z();
        let updated = conn.execute(
            "UPDATE enrollments
             SET certificate_number = COALESCE(certificate_number, ?1),
                 certificate_issued_by = COALESCE(certificate_issued_by, ?2),
                 certificate_issued_at = COALESCE(certificate_issued_at, ?3),
                 certificate_issue_date = COALESCE(certificate_issue_date, ?4),
                 status = 'graduated',
                 updated_at = ?3
             WHERE id = ?5 AND status IN ('completed', 'graduated')",
            params![number, issuer, now, requested_date.to_string(), enrollment_id],
        )?;
        if updated == 0 {
            return Err(SchoolError::Conflict(format!(
                "enrollment '{}' changed concurrently; retry",
                enrollment_id
            )));
        }

        let graduated = enrollment::get_enrollment_in(conn, enrollment_id)?;
        Ok(CertificateIssue {
            certificate_number: graduated.certificate_number.clone().unwrap_or(number),
            issue_date: graduated
                .certificate_issue_date
                .clone()
                .unwrap_or_else(|| requested_date.to_string()),
            enrollment: graduated,
            already_issued: false,
        })
    })?;

    if !issue.already_issued {
        tracing::info!(
            enrollment_id,
            issuer,
            certificate_number = %issue.certificate_number,
            "certificate issued"
        );
    }
    Ok(issue)
}

/// Organization name and its location (the parent's name, else its own).
fn naming_in(conn: &Connection, enrollment: &Enrollment) -> Result<(String, String), SchoolError> {
    let Some(org_id) = enrollment::owning_org_in(conn, enrollment)? else {
        return Ok((
            FALLBACK_ORGANIZATION_NAME.to_string(),
            FALLBACK_ORGANIZATION_NAME.to_string(),
        ));
    };
    let org = organization::get_organization_in(conn, &org_id)?;
    let location = match org.parent_id.as_deref() {
        Some(parent_id) => organization::get_organization_in(conn, parent_id)?.name,
        None => org.name.clone(),
    };
    Ok((org.name, location))
}

/// `renderCertificate`. Only graduated enrollments have a certificate.
pub fn render_certificate(
    store: &Store,
    enrollment_id: &str,
    renderer: &dyn CertificateRenderer,
) -> Result<RenderedCertificate, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let (number, request) = broker.with_conn(&db_path, "ecclesia", "certificate.render", |conn| {
        let graduated = enrollment::get_enrollment_in(conn, enrollment_id)?;
        let (Some(number), Some(issue_date)) = (
            graduated.certificate_number.clone(),
            graduated.certificate_issue_date.clone(),
        ) else {
            return Err(SchoolError::BadRequest(format!(
                "enrollment '{}' has no certificate (status {})",
                enrollment_id, graduated.status
            )));
        };
        let (organization_name, location_name) = naming_in(conn, &graduated)?;
        Ok((
            number,
            CertificateRenderRequest {
                student_name: graduated.student_name,
                issue_date,
                organization_name,
                location_name,
            },
        ))
    })?;

    let bytes = renderer.render(&request).map_err(|e| {
        tracing::warn!(enrollment_id, error = %e, "certificate renderer failed");
        SchoolError::RenderUnavailable(e.to_string())
    })?;
    Ok(RenderedCertificate {
        certificate_number: number,
        media_type: renderer.media_type().to_string(),
        bytes,
    })
}

/// Public lookup by certificate number.
pub fn verify_certificate(store: &Store, certificate_number: &str) -> Result<CertificateRecord, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "certificate.verify", |conn| {
        let enrollment_id: Option<String> = conn
            .query_row(
                "SELECT id FROM enrollments WHERE certificate_number = ?1",
                params![certificate_number],
                |row| row.get(0),
            )
            .optional()?;
        let Some(enrollment_id) = enrollment_id else {
            return Err(SchoolError::NotFound(format!(
                "certificate '{}' not found",
                certificate_number
            )));
        };
        let graduated = enrollment::get_enrollment_in(conn, &enrollment_id)?;
        let issue_date = graduated.certificate_issue_date.clone().unwrap_or_default();
        let (organization_name, _) = naming_in(conn, &graduated)?;
        Ok(CertificateRecord {
            certificate_number: certificate_number.to_string(),
            verification_code: verification_code(certificate_number, &graduated.student_id, &issue_date),
            student_name: graduated.student_name,
            issue_date,
            organization_name,
            status: graduated.status,
        })
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "certificate",
        "version": "0.1.0",
        "description": "Role-gated certificate issuance, rendering and verification",
        "commands": [
            { "name": "issue", "parameters": ["enrollment", "date"] },
            { "name": "render", "parameters": ["enrollment", "out"] },
            { "name": "verify", "parameters": ["number"] }
        ],
        "storage": ["school.db"]
    })
}
