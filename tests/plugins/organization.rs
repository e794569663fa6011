use ecclesia::core::db::initialize_school_db;
use ecclesia::core::error::SchoolError;
use ecclesia::core::store::Store;
use ecclesia::plugins::authz::{Role, role_of};
use ecclesia::plugins::organization::{
    GrantKind, MemberRole, MemberStatus, NewOrganization, OrgType, OrganizationUpdate,
    add_member, create_organization, get_by_slug, get_organization, grant_role, list_children,
    list_members, list_organizations, member_count, remove_member, revoke_role, set_member_status,
    update_organization,
};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("data");
    initialize_school_db(&root).unwrap();
    (tmp, Store::scratch(root))
}

fn new_org(name: &str, org_type: OrgType, parent: Option<&str>) -> NewOrganization {
    NewOrganization {
        name: name.to_string(),
        org_type,
        parent_id: parent.map(str::to_string),
        description: String::new(),
    }
}

#[test]
fn test_root_creator_becomes_leader_and_member() {
    let (_tmp, store) = test_store();

    let zone = create_organization(&store, "bishop", new_org("Lagos Zone", OrgType::Zone, None)).unwrap();
    assert!(zone.id.starts_with("ORG_"));
    assert_eq!(zone.slug, "lagos-zone");
    assert_eq!(zone.leader_id.as_deref(), Some("bishop"));
    assert_eq!(zone.created_by, "bishop");

    let members = list_members(&store, &zone.id).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, "bishop");
    assert_eq!(members[0].role, MemberRole::Leader);
    assert_eq!(member_count(&store, &zone.id).unwrap(), 1);
}

#[test]
fn test_slug_collisions_get_numeric_suffix_per_type() {
    let (_tmp, store) = test_store();

    let a = create_organization(&store, "u1", new_org("Grace", OrgType::Church, None)).unwrap();
    let b = create_organization(&store, "u2", new_org("Grace", OrgType::Church, None)).unwrap();
    let c = create_organization(&store, "u3", new_org("Grace", OrgType::Church, None)).unwrap();
    let zone = create_organization(&store, "u4", new_org("Grace", OrgType::Zone, None)).unwrap();

    assert_eq!(a.slug, "grace");
    assert_eq!(b.slug, "grace-2");
    assert_eq!(c.slug, "grace-3");
    assert_eq!(zone.slug, "grace");

    let found = get_by_slug(&store, "grace-2", OrgType::Church).unwrap();
    assert_eq!(found.id, b.id);
    assert!(matches!(
        get_by_slug(&store, "grace-9", OrgType::Church),
        Err(SchoolError::NotFound(_))
    ));
}

#[test]
fn test_child_must_rank_below_parent() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();

    let err = create_organization(&store, "pastor", new_org("North", OrgType::Zone, Some(&church.id)))
        .unwrap_err();
    assert!(matches!(err, SchoolError::BadRequest(_)));

    let err = create_organization(&store, "pastor", new_org("Same", OrgType::Church, Some(&church.id)))
        .unwrap_err();
    assert!(matches!(err, SchoolError::BadRequest(_)));

    // Skipping levels is allowed as long as the rank grows.
    let cell = create_organization(&store, "pastor", new_org("Cell A", OrgType::Cell, Some(&church.id)))
        .unwrap();
    assert_eq!(cell.parent_id.as_deref(), Some(church.id.as_str()));
    let children = list_children(&store, &church.id).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, cell.id);
}

#[test]
fn test_child_creation_requires_management_on_parent() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();

    let err = create_organization(
        &store,
        "stranger",
        new_org("Youth", OrgType::Fellowship, Some(&church.id)),
    )
    .unwrap_err();
    assert!(matches!(err, SchoolError::Forbidden(_)));

    let err = create_organization(&store, "pastor", new_org("Youth", OrgType::Fellowship, Some("ORG_missing")))
        .unwrap_err();
    assert!(matches!(err, SchoolError::NotFound(_)));

    grant_role(&store, "pastor", &church.id, "deacon", GrantKind::Assistant).unwrap();
    let fellowship = create_organization(
        &store,
        "deacon",
        new_org("Youth", OrgType::Fellowship, Some(&church.id)),
    )
    .unwrap();
    assert_eq!(fellowship.leader_id.as_deref(), Some("deacon"));
}

#[test]
fn test_membership_management() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();

    add_member(&store, "pastor", &church.id, "amy", MemberRole::Member, MemberStatus::Active).unwrap();
    add_member(&store, "pastor", &church.id, "ben", MemberRole::Worker, MemberStatus::Pending).unwrap();
    assert_eq!(member_count(&store, &church.id).unwrap(), 2);

    set_member_status(&store, "pastor", &church.id, "ben", MemberStatus::Active).unwrap();
    assert_eq!(member_count(&store, &church.id).unwrap(), 3);

    // Re-adding updates in place.
    let m = add_member(&store, "pastor", &church.id, "amy", MemberRole::Pastor, MemberStatus::Active)
        .unwrap();
    assert_eq!(m.role, MemberRole::Pastor);
    assert_eq!(list_members(&store, &church.id).unwrap().len(), 3);

    remove_member(&store, "pastor", &church.id, "amy").unwrap();
    assert!(matches!(
        remove_member(&store, "pastor", &church.id, "amy"),
        Err(SchoolError::NotFound(_))
    ));
    assert!(matches!(
        remove_member(&store, "pastor", &church.id, "pastor"),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(
        add_member(&store, "ben", &church.id, "cat", MemberRole::Member, MemberStatus::Active),
        Err(SchoolError::Forbidden(_))
    ));
}

#[test]
fn test_update_keeps_slug() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();

    let updated = update_organization(
        &store,
        "pastor",
        &church.id,
        OrganizationUpdate {
            name: Some("Grace Chapel".to_string()),
            description: Some("Sunday 9am".to_string()),
            ..OrganizationUpdate::default()
        },
    )
    .unwrap();
    assert_eq!(updated.name, "Grace Chapel");
    assert_eq!(updated.description, "Sunday 9am");
    assert_eq!(updated.slug, "grace");

    assert!(matches!(
        update_organization(&store, "stranger", &church.id, OrganizationUpdate::default()),
        Err(SchoolError::Forbidden(_))
    ));
}

#[test]
fn test_only_owner_or_admin_changes_grants() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();

    grant_role(&store, "pastor", &church.id, "ada", GrantKind::Admin).unwrap();
    grant_role(&store, "pastor", &church.id, "deacon", GrantKind::Assistant).unwrap();
    // Granting twice is a no-op.
    grant_role(&store, "pastor", &church.id, "deacon", GrantKind::Assistant).unwrap();

    grant_role(&store, "ada", &church.id, "eve", GrantKind::Assistant).unwrap();
    assert!(matches!(
        grant_role(&store, "deacon", &church.id, "fred", GrantKind::Assistant),
        Err(SchoolError::Forbidden(_))
    ));

    revoke_role(&store, "ada", &church.id, "eve", GrantKind::Assistant).unwrap();
    assert!(matches!(
        revoke_role(&store, "ada", &church.id, "eve", GrantKind::Assistant),
        Err(SchoolError::NotFound(_))
    ));
}

#[test]
fn test_assistant_cannot_raise_roles() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();
    grant_role(&store, "pastor", &church.id, "deacon", GrantKind::Assistant).unwrap();

    // An admin membership would let its holder grant roles.
    assert!(matches!(
        add_member(&store, "deacon", &church.id, "crony", MemberRole::Admin, MemberStatus::Active),
        Err(SchoolError::Forbidden(_))
    ));
    assert_eq!(role_of(&store, "crony", &church.id).unwrap(), None);
    add_member(&store, "deacon", &church.id, "crony", MemberRole::Worker, MemberStatus::Active).unwrap();
    assert_eq!(role_of(&store, "crony", &church.id).unwrap(), Some(Role::Worker));

    // Taking over the leader seat would make the assistant an owner.
    let takeover = OrganizationUpdate {
        leader_id: Some("deacon".to_string()),
        ..OrganizationUpdate::default()
    };
    assert!(matches!(
        update_organization(&store, "deacon", &church.id, takeover.clone()),
        Err(SchoolError::Forbidden(_))
    ));
    assert_eq!(role_of(&store, "deacon", &church.id).unwrap(), Some(Role::Assistant));
    assert_eq!(
        get_organization(&store, &church.id).unwrap().leader_id.as_deref(),
        Some("pastor")
    );

    // Restating the current leader is not a change.
    let unchanged = update_organization(
        &store,
        "deacon",
        &church.id,
        OrganizationUpdate {
            description: Some("Sunday 9am".to_string()),
            leader_id: Some("pastor".to_string()),
            ..OrganizationUpdate::default()
        },
    )
    .unwrap();
    assert_eq!(unchanged.description, "Sunday 9am");

    // Owners and admins may do both.
    grant_role(&store, "pastor", &church.id, "ada", GrantKind::Admin).unwrap();
    add_member(&store, "ada", &church.id, "bola", MemberRole::Admin, MemberStatus::Active).unwrap();
    assert_eq!(role_of(&store, "bola", &church.id).unwrap(), Some(Role::Admin));
    let moved = update_organization(&store, "pastor", &church.id, takeover).unwrap();
    assert_eq!(moved.leader_id.as_deref(), Some("deacon"));
}

#[test]
fn test_outsider_is_forbidden_before_rank_is_checked() {
    let (_tmp, store) = test_store();
    let church = create_organization(&store, "pastor", new_org("Grace", OrgType::Church, None)).unwrap();

    let err = create_organization(&store, "stranger", new_org("North", OrgType::Zone, Some(&church.id)))
        .unwrap_err();
    assert!(matches!(err, SchoolError::Forbidden(_)));
}

#[test]
fn test_list_organizations_by_type() {
    let (_tmp, store) = test_store();
    let zone = create_organization(&store, "bishop", new_org("Zone 1", OrgType::Zone, None)).unwrap();
    create_organization(&store, "bishop", new_org("Grace", OrgType::Church, Some(&zone.id))).unwrap();
    create_organization(&store, "bishop", new_org("Hope", OrgType::Church, Some(&zone.id))).unwrap();

    assert_eq!(list_organizations(&store, None).unwrap().len(), 3);
    assert_eq!(list_organizations(&store, Some(OrgType::Church)).unwrap().len(), 2);
    assert!(list_organizations(&store, Some(OrgType::Cell)).unwrap().is_empty());
    assert!(matches!(
        get_organization(&store, "ORG_nope"),
        Err(SchoolError::NotFound(_))
    ));
}
