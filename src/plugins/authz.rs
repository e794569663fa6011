//! Role resolution and authorization gates.
//!
//! Role resolution is a decision table: every way a user can relate to an
//! organization is normalized into a [`RoleAssignment`], and
//! [`resolve_role`] picks the highest-precedence match.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::SchoolError;
use crate::core::store::Store;
use crate::plugins::organization::{self, MemberRole};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Effective role of a user on one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Assistant,
    Pastor,
    Leader,
    Worker,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Assistant => "assistant",
            Self::Pastor => "pastor",
            Self::Leader => "leader",
            Self::Worker => "worker",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MemberRole> for Role {
    fn from(role: MemberRole) -> Self {
        match role {
            MemberRole::Member => Self::Member,
            MemberRole::Worker => Self::Worker,
            MemberRole::Leader => Self::Leader,
            MemberRole::Pastor => Self::Pastor,
            MemberRole::Admin => Self::Admin,
        }
    }
}

/// How a user is attached to an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSource {
    Leader,
    Creator,
    AdminGrant,
    AssistantGrant,
    Membership(MemberRole),
}

impl RoleSource {
    /// Lower wins.
    fn precedence(&self) -> u8 {
        match self {
            Self::Leader => 0,
            Self::Creator => 1,
            Self::AdminGrant => 2,
            Self::AssistantGrant => 3,
            Self::Membership(_) => 4,
        }
    }

    fn role(&self) -> Role {
        match self {
            Self::Leader | Self::Creator => Role::Owner,
            Self::AdminGrant => Role::Admin,
            Self::AssistantGrant => Role::Assistant,
            Self::Membership(role) => Role::from(*role),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub user_id: String,
    pub source: RoleSource,
}

impl RoleAssignment {
    pub fn new(user_id: impl Into<String>, source: RoleSource) -> Self {
        Self {
            user_id: user_id.into(),
            source,
        }
    }
}

/// Resolve `user`'s role from a normalized assignment list.
pub fn resolve_role(user: &str, assignments: &[RoleAssignment]) -> Option<Role> {
    assignments
        .iter()
        .filter(|a| a.user_id == user)
        .min_by_key(|a| a.source.precedence())
        .map(|a| a.source.role())
}

pub fn can_manage(role: Option<Role>) -> bool {
    matches!(role, Some(Role::Owner | Role::Admin | Role::Assistant))
}

/// Collect every assignment recorded for an organization.
pub fn assignments_in(conn: &Connection, org_id: &str) -> Result<Vec<RoleAssignment>, SchoolError> {
    let org = organization::get_organization_in(conn, org_id)?;
    let mut out = Vec::new();

    if let Some(leader) = org.leader_id {
        out.push(RoleAssignment::new(leader, RoleSource::Leader));
    }
    out.push(RoleAssignment::new(org.created_by, RoleSource::Creator));

    let mut stmt =
        conn.prepare("SELECT user_id, grant_kind FROM org_role_grants WHERE org_id = ?1")?;
    let grants = stmt.query_map(params![org_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for grant in grants {
        let (user_id, kind) = grant?;
        let source = match kind.as_str() {
            "admin" => RoleSource::AdminGrant,
            "assistant" => RoleSource::AssistantGrant,
            _ => continue,
        };
        out.push(RoleAssignment::new(user_id, source));
    }

    let mut stmt = conn.prepare("SELECT user_id, role FROM org_members WHERE org_id = ?1")?;
    let members = stmt.query_map(params![org_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for member in members {
        let (user_id, role) = member?;
        if let Ok(role) = role.parse::<MemberRole>() {
            out.push(RoleAssignment::new(user_id, RoleSource::Membership(role)));
        }
    }

    Ok(out)
}

pub fn role_of_in(conn: &Connection, user: &str, org_id: &str) -> Result<Option<Role>, SchoolError> {
    let assignments = assignments_in(conn, org_id)?;
    Ok(resolve_role(user, &assignments))
}

/// `roleOf(user, organization)`. NotFound when the organization does not exist.
pub fn role_of(store: &Store, user: &str, org_id: &str) -> Result<Option<Role>, SchoolError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::school_db_path(&store.root);
    broker.with_conn(&db_path, user, "authz.role_of", |conn| {
        role_of_in(conn, user, org_id)
    })
}

/// Fails `Forbidden` unless `user` holds a management role on `org_id`.
pub fn require_manage_in(
    conn: &Connection,
    user: &str,
    org_id: &str,
    action: &str,
) -> Result<Role, SchoolError> {
    let role = role_of_in(conn, user, org_id)?;
    match role {
        Some(role) if can_manage(Some(role)) => Ok(role),
        _ => {
            tracing::warn!(user, org_id, action, role = ?role, "management check denied");
            Err(SchoolError::Forbidden(format!(
                "user '{}' may not {}: requires owner, admin or assistant on organization '{}' (has {})",
                user,
                action,
                org_id,
                role.map(|r| r.as_str()).unwrap_or("no role")
            )))
        }
    }
}

/// The catalog is school-wide: configured registrars may write it, as may an
/// owner or admin of any top-level organization.
pub fn require_registrar_in(
    conn: &Connection,
    user: &str,
    registrars: &[String],
    action: &str,
) -> Result<(), SchoolError> {
    if registrars.iter().any(|r| r == user) {
        return Ok(());
    }
    let mut stmt = conn.prepare("SELECT id FROM organizations WHERE parent_id IS NULL ORDER BY id")?;
    let roots = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for org_id in roots {
        if matches!(role_of_in(conn, user, &org_id)?, Some(Role::Owner | Role::Admin)) {
            return Ok(());
        }
    }

    tracing::warn!(user, action, "registrar check denied");
    Err(SchoolError::Forbidden(format!(
        "user '{}' may not {}: not a configured registrar and not owner or admin of a top-level organization",
        user, action
    )))
}

/// True when `user` is the principal or a teacher of `batch_id`.
pub fn is_batch_staff_in(conn: &Connection, batch_id: &str, user: &str) -> Result<bool, SchoolError> {
    let principal: Option<Option<String>> = conn
        .query_row(
            "SELECT principal_id FROM batches WHERE id = ?1",
            params![batch_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(principal) = principal else {
        return Ok(false);
    };
    if principal.as_deref() == Some(user) {
        return Ok(true);
    }
    let teacher: i64 = conn.query_row(
        "SELECT COUNT(*) FROM batch_teachers WHERE batch_id = ?1 AND user_id = ?2",
        params![batch_id, user],
        |row| row.get(0),
    )?;
    Ok(teacher > 0)
}

/// Gate shared by grading and certificate issuance: batch principal/teacher,
/// or a management role on the owning organization.
pub fn require_school_staff_in(
    conn: &Connection,
    user: &str,
    org_id: Option<&str>,
    batch_id: Option<&str>,
    action: &str,
) -> Result<(), SchoolError> {
    if let Some(batch_id) = batch_id {
        if is_batch_staff_in(conn, batch_id, user)? {
            return Ok(());
        }
    }
    if let Some(org_id) = org_id {
        if can_manage(role_of_in(conn, user, org_id)?) {
            return Ok(());
        }
    }

    tracing::warn!(user, org_id, batch_id, action, "school staff check denied");
    let mut failed = Vec::new();
    match org_id {
        Some(org_id) => failed.push(format!("no management role on organization '{}'", org_id)),
        None => failed.push("no owning organization".to_string()),
    }
    match batch_id {
        Some(batch_id) => failed.push(format!("not principal or teacher of batch '{}'", batch_id)),
        None => failed.push("no batch".to_string()),
    }
    Err(SchoolError::Forbidden(format!(
        "user '{}' may not {}: {}",
        user,
        action,
        failed.join(" and ")
    )))
}
