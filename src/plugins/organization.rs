//! Organization directory: the zone > church > fellowship > cell > bible-study
//! hierarchy, memberships, and role grants.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::{self, SchoolError};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::authz::{self, Role};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Hierarchy level. Declaration order is the rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgType {
    Zone,
    Church,
    Fellowship,
    Cell,
    #[serde(rename = "biblestudy")]
    BibleStudy,
}

impl OrgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Church => "church",
            Self::Fellowship => "fellowship",
            Self::Cell => "cell",
            Self::BibleStudy => "biblestudy",
        }
    }

    /// Whether an organization of type `child` may sit directly under `self`.
    pub fn can_parent(&self, child: OrgType) -> bool {
        child > *self
    }
}

impl fmt::Display for OrgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgType {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zone" => Ok(Self::Zone),
            "church" => Ok(Self::Church),
            "fellowship" => Ok(Self::Fellowship),
            "cell" => Ok(Self::Cell),
            "biblestudy" | "bible-study" | "bible_study" => Ok(Self::BibleStudy),
            other => Err(SchoolError::BadRequest(format!(
                "unknown organization type '{}' (expected zone, church, fellowship, cell, biblestudy)",
                other
            ))),
        }
    }
}

/// Role stored on a membership record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Worker,
    Leader,
    Pastor,
    Admin,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Worker => "worker",
            Self::Leader => "leader",
            Self::Pastor => "pastor",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for MemberRole {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "worker" => Ok(Self::Worker),
            "leader" => Ok(Self::Leader),
            "pastor" => Ok(Self::Pastor),
            "admin" => Ok(Self::Admin),
            other => Err(SchoolError::BadRequest(format!(
                "unknown member role '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Pending,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Pending => "pending",
        }
    }
}

impl FromStr for MemberStatus {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending" => Ok(Self::Pending),
            other => Err(SchoolError::BadRequest(format!(
                "unknown member status '{}'",
                other
            ))),
        }
    }
}

/// Explicit role grants layered on top of membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantKind {
    Admin,
    Assistant,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for GrantKind {
    type Err = SchoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "assistant" | "assistant-leader" => Ok(Self::Assistant),
            other => Err(SchoolError::BadRequest(format!("unknown grant '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub org_type: OrgType,
    pub parent_id: Option<String>,
    pub leader_id: Option<String>,
    pub created_by: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Membership {
    pub org_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: String,
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub org_type: OrgType,
    pub parent_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub leader_id: Option<String>,
}

const ORG_COLUMNS: &str =
    "id, name, slug, org_type, parent_id, leader_id, created_by, description, created_at, updated_at";

fn parse_col<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value '{}'", raw).into(),
        )
    })
}

fn org_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        org_type: parse_col(row, 3)?,
        parent_id: row.get(4)?,
        leader_id: row.get(5)?,
        created_by: row.get(6)?,
        description: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        org_id: row.get(0)?,
        user_id: row.get(1)?,
        role: parse_col(row, 2)?,
        status: parse_col(row, 3)?,
        joined_at: row.get(4)?,
    })
}

/// URL-safe slug: lowercase ASCII words joined by `-`.
pub fn slugify(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
    let lowered = name.to_lowercase();
    let slug = re.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "org".to_string()
    } else {
        slug.to_string()
    }
}

fn unique_slug_in(conn: &Connection, base: &str, org_type: OrgType) -> Result<String, SchoolError> {
    let mut candidate = base.to_string();
    let mut suffix = 1;
    loop {
        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM organizations WHERE slug = ?1 AND org_type = ?2",
            params![candidate, org_type.as_str()],
            |row| row.get(0),
        )?;
        if taken == 0 {
            return Ok(candidate);
        }
        suffix += 1;
        candidate = format!("{}-{}", base, suffix);
    }
}

pub fn get_organization_in(conn: &Connection, org_id: &str) -> Result<Organization, SchoolError> {
    conn.query_row(
        &format!("SELECT {} FROM organizations WHERE id = ?1", ORG_COLUMNS),
        params![org_id],
        org_from_row,
    )
    .optional()?
    .ok_or_else(|| SchoolError::NotFound(format!("organization '{}' not found", org_id)))
}

fn broker_for(store: &Store) -> (DbBroker, std::path::PathBuf) {
    (DbBroker::new(&store.root), db::school_db_path(&store.root))
}

/// Create an organization.
///
/// A root organization needs no prior role: the creator becomes its leader,
/// its `created_by`, and its first member. Creating under a parent requires
/// a management role on the parent (checked first) and a strictly deeper type.
pub fn create_organization(
    store: &Store,
    creator: &str,
    new_org: NewOrganization,
) -> Result<Organization, SchoolError> {
    let name = new_org.name.trim().to_string();
    if name.is_empty() {
        return Err(SchoolError::BadRequest(
            "organization name is required".to_string(),
        ));
    }

    let (broker, db_path) = broker_for(store);
    let org = broker.with_tx(&db_path, creator, "organization.create", |conn| {
        if let Some(parent_id) = new_org.parent_id.as_deref() {
            authz::require_manage_in(conn, creator, parent_id, "create a child organization")?;
            let parent = get_organization_in(conn, parent_id)?;
            if !parent.org_type.can_parent(new_org.org_type) {
                return Err(SchoolError::BadRequest(format!(
                    "a {} cannot be placed under a {}",
                    new_org.org_type, parent.org_type
                )));
            }
        }

        let slug = unique_slug_in(conn, &slugify(&name), new_org.org_type)?;
        let now = time::now_epoch_z();
        let org = Organization {
            id: time::prefixed_id("ORG"),
            name: name.clone(),
            slug,
            org_type: new_org.org_type,
            parent_id: new_org.parent_id.clone(),
            leader_id: Some(creator.to_string()),
            created_by: creator.to_string(),
            description: new_org.description.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        conn.execute(
            &format!(
                "INSERT INTO organizations({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                ORG_COLUMNS
            ),
            params![
                org.id,
                org.name,
                org.slug,
                org.org_type.as_str(),
                org.parent_id,
                org.leader_id,
                org.created_by,
                org.description,
                org.created_at,
                org.updated_at,
            ],
        )
        .map_err(|e| {
            error::conflict_on_constraint(
                e,
                &format!("slug '{}' already taken for type {}", org.slug, org.org_type),
            )
        })?;

        conn.execute(
            "INSERT INTO org_members(org_id, user_id, role, status, joined_at) VALUES(?1, ?2, 'leader', 'active', ?3)",
            params![org.id, creator, now],
        )?;

        Ok(org)
    })?;

    tracing::info!(org_id = %org.id, slug = %org.slug, org_type = %org.org_type, creator, "organization created");
    Ok(org)
}

pub fn get_organization(store: &Store, org_id: &str) -> Result<Organization, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "organization.get", |conn| {
        get_organization_in(conn, org_id)
    })
}

pub fn get_by_slug(store: &Store, slug: &str, org_type: OrgType) -> Result<Organization, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "organization.get_by_slug", |conn| {
        conn.query_row(
            &format!(
                "SELECT {} FROM organizations WHERE slug = ?1 AND org_type = ?2",
                ORG_COLUMNS
            ),
            params![slug, org_type.as_str()],
            org_from_row,
        )
        .optional()?
        .ok_or_else(|| {
            SchoolError::NotFound(format!("{} with slug '{}' not found", org_type, slug))
        })
    })
}

pub fn list_children(store: &Store, parent_id: &str) -> Result<Vec<Organization>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "organization.children", |conn| {
        get_organization_in(conn, parent_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM organizations WHERE parent_id = ?1 ORDER BY name",
            ORG_COLUMNS
        ))?;
        let children = stmt
            .query_map(params![parent_id], org_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children)
    })
}

pub fn list_organizations(
    store: &Store,
    type_filter: Option<OrgType>,
) -> Result<Vec<Organization>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "organization.list", |conn| {
        let orgs = match type_filter {
            Some(t) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM organizations WHERE org_type = ?1 ORDER BY name",
                    ORG_COLUMNS
                ))?;
                stmt.query_map(params![t.as_str()], org_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM organizations ORDER BY name",
                    ORG_COLUMNS
                ))?;
                stmt.query_map([], org_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(orgs)
    })
}

/// Number of active memberships.
pub fn member_count(store: &Store, org_id: &str) -> Result<u64, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "organization.member_count", |conn| {
        get_organization_in(conn, org_id)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM org_members WHERE org_id = ?1 AND status = 'active'",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    })
}

pub fn list_members(store: &Store, org_id: &str) -> Result<Vec<Membership>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, "ecclesia", "organization.members", |conn| {
        get_organization_in(conn, org_id)?;
        let mut stmt = conn.prepare(
            "SELECT org_id, user_id, role, status, joined_at FROM org_members WHERE org_id = ?1 ORDER BY joined_at, user_id",
        )?;
        let members = stmt
            .query_map(params![org_id], membership_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    })
}

pub fn update_organization(
    store: &Store,
    actor: &str,
    org_id: &str,
    update: OrganizationUpdate,
) -> Result<Organization, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "organization.update", |conn| {
        let current = get_organization_in(conn, org_id)?;
        authz::require_manage_in(conn, actor, org_id, "update the organization")?;
        if let Some(leader) = update.leader_id.as_deref() {
            if current.leader_id.as_deref() != Some(leader) {
                require_grantor_in(conn, actor, org_id, "change the organization leader")?;
            }
        }
        let now = time::now_epoch_z();

        if let Some(name) = update.name.as_deref() {
            if name.trim().is_empty() {
                return Err(SchoolError::BadRequest(
                    "organization name cannot be empty".to_string(),
                ));
            }
            conn.execute(
                "UPDATE organizations SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name.trim(), now, org_id],
            )?;
        }
        if let Some(description) = update.description.as_deref() {
            conn.execute(
                "UPDATE organizations SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![description, now, org_id],
            )?;
        }
        if let Some(leader) = update.leader_id.as_deref() {
            conn.execute(
                "UPDATE organizations SET leader_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![leader, now, org_id],
            )?;
        }

        get_organization_in(conn, org_id)
    })
}

/// Add a member or update an existing membership's role and status.
pub fn add_member(
    store: &Store,
    actor: &str,
    org_id: &str,
    user_id: &str,
    role: MemberRole,
    status: MemberStatus,
) -> Result<Membership, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let membership = broker.with_tx(&db_path, actor, "organization.add_member", |conn| {
        authz::require_manage_in(conn, actor, org_id, "add members")?;
        if role == MemberRole::Admin {
            require_grantor_in(conn, actor, org_id, "add an admin member")?;
        }
        conn.execute(
            "INSERT INTO org_members(org_id, user_id, role, status, joined_at) VALUES(?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(org_id, user_id) DO UPDATE SET role = excluded.role, status = excluded.status",
            params![org_id, user_id, role.as_str(), status.as_str(), time::now_epoch_z()],
        )?;
        conn.query_row(
            "SELECT org_id, user_id, role, status, joined_at FROM org_members WHERE org_id = ?1 AND user_id = ?2",
            params![org_id, user_id],
            membership_from_row,
        )
        .map_err(SchoolError::from)
    })?;

    tracing::info!(org_id, user_id, role = role.as_str(), actor, "membership saved");
    Ok(membership)
}

pub fn remove_member(
    store: &Store,
    actor: &str,
    org_id: &str,
    user_id: &str,
) -> Result<(), SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "organization.remove_member", |conn| {
        authz::require_manage_in(conn, actor, org_id, "remove members")?;
        let org = get_organization_in(conn, org_id)?;
        if org.leader_id.as_deref() == Some(user_id) {
            return Err(SchoolError::BadRequest(format!(
                "'{}' leads organization '{}'; assign a new leader first",
                user_id, org_id
            )));
        }
        let removed = conn.execute(
            "DELETE FROM org_members WHERE org_id = ?1 AND user_id = ?2",
            params![org_id, user_id],
        )?;
        if removed == 0 {
            return Err(SchoolError::NotFound(format!(
                "'{}' is not a member of organization '{}'",
                user_id, org_id
            )));
        }
        Ok(())
    })
}

pub fn set_member_status(
    store: &Store,
    actor: &str,
    org_id: &str,
    user_id: &str,
    status: MemberStatus,
) -> Result<(), SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "organization.member_status", |conn| {
        authz::require_manage_in(conn, actor, org_id, "change membership status")?;
        let updated = conn.execute(
            "UPDATE org_members SET status = ?1 WHERE org_id = ?2 AND user_id = ?3",
            params![status.as_str(), org_id, user_id],
        )?;
        if updated == 0 {
            return Err(SchoolError::NotFound(format!(
                "'{}' is not a member of organization '{}'",
                user_id, org_id
            )));
        }
        Ok(())
    })
}

/// Owner or admin. Everything that can raise someone's role goes through here.
fn require_grantor_in(
    conn: &Connection,
    actor: &str,
    org_id: &str,
    action: &str,
) -> Result<(), SchoolError> {
    let role = authz::require_manage_in(conn, actor, org_id, action)?;
    if role == Role::Assistant {
        tracing::warn!(user = actor, org_id, action, "grantor check denied");
        return Err(SchoolError::Forbidden(format!(
            "user '{}' may not {}: requires owner or admin on organization '{}' (has assistant)",
            actor, action, org_id
        )));
    }
    Ok(())
}

/// Add `user_id` to the admin or assistant set. Owners and admins only.
pub fn grant_role(
    store: &Store,
    actor: &str,
    org_id: &str,
    user_id: &str,
    grant: GrantKind,
) -> Result<(), SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "organization.grant", |conn| {
        require_grantor_in(conn, actor, org_id, "change role grants")?;
        conn.execute(
            "INSERT OR IGNORE INTO org_role_grants(org_id, user_id, grant_kind, granted_by, granted_at) VALUES(?1, ?2, ?3, ?4, ?5)",
            params![org_id, user_id, grant.as_str(), actor, time::now_epoch_z()],
        )?;
        Ok(())
    })?;
    tracing::info!(org_id, user_id, grant = grant.as_str(), actor, "role granted");
    Ok(())
}

pub fn revoke_role(
    store: &Store,
    actor: &str,
    org_id: &str,
    user_id: &str,
    grant: GrantKind,
) -> Result<(), SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, actor, "organization.revoke", |conn| {
        require_grantor_in(conn, actor, org_id, "change role grants")?;
        let removed = conn.execute(
            "DELETE FROM org_role_grants WHERE org_id = ?1 AND user_id = ?2 AND grant_kind = ?3",
            params![org_id, user_id, grant.as_str()],
        )?;
        if removed == 0 {
            return Err(SchoolError::NotFound(format!(
                "'{}' holds no {} grant on organization '{}'",
                user_id,
                grant.as_str(),
                org_id
            )));
        }
        Ok(())
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "org",
        "version": "0.1.0",
        "description": "Organization hierarchy, memberships and role grants",
        "commands": [
            { "name": "create", "parameters": ["name", "type", "parent", "description"] },
            { "name": "get", "parameters": ["id | slug+type"] },
            { "name": "list", "parameters": ["type"] },
            { "name": "children", "parameters": ["id"] },
            { "name": "members", "parameters": ["id"] },
            { "name": "update", "parameters": ["id", "name", "description", "leader"] },
            { "name": "add-member", "parameters": ["id", "user", "role", "status"] },
            { "name": "remove-member", "parameters": ["id", "user"] },
            { "name": "member-status", "parameters": ["id", "user", "status"] },
            { "name": "grant", "parameters": ["id", "user", "grant"] },
            { "name": "revoke", "parameters": ["id", "user", "grant"] },
            { "name": "role", "parameters": ["id", "user"] }
        ],
        "storage": ["school.db"]
    })
}
