use ecclesia::core::broker::{BrokerEvent, DbBroker};
use ecclesia::core::config::load_config;
use ecclesia::core::db::{db_connect, initialize_school_db, school_db_path};
use ecclesia::core::error::{ErrorKind, SchoolError, conflict_on_constraint};
use ecclesia::core::schemas::SCHOOL_SCHEMA_VERSION;
use std::fs;
use tempfile::tempdir;

fn read_events(root: &std::path::Path) -> Vec<BrokerEvent> {
    fs::read_to_string(root.join("broker.events.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_initialize_is_idempotent_and_versioned() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("data");
    initialize_school_db(&root).unwrap();
    initialize_school_db(&root).unwrap();

    let conn = db_connect(&school_db_path(&root).to_string_lossy()).unwrap();
    let version: String = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, SCHOOL_SCHEMA_VERSION.to_string());

    let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
    assert_eq!(fk, 1);
}

#[test]
fn test_broker_audits_every_call() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("data");
    initialize_school_db(&root).unwrap();
    let broker = DbBroker::new(&root);
    let db_path = school_db_path(&root);

    let count: i64 = broker
        .with_conn(&db_path, "auditor", "meta.count", |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))?)
        })
        .unwrap();
    assert_eq!(count, 1);
    let failed: Result<(), SchoolError> = broker.with_conn(&db_path, "auditor", "meta.fail", |_| {
        Err(SchoolError::NotFound("nothing".to_string()))
    });
    assert!(failed.is_err());

    let events = read_events(&root);
    let last_two = &events[events.len() - 2..];
    assert_eq!(last_two[0].op, "meta.count");
    assert_eq!(last_two[0].actor, "auditor");
    assert_eq!(last_two[0].status, "success");
    assert_eq!(last_two[0].db_id, "school.db");
    assert_eq!(last_two[1].op, "meta.fail");
    assert_eq!(last_two[1].status, "error");
}

#[test]
fn test_with_tx_rolls_back_on_error() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("data");
    initialize_school_db(&root).unwrap();
    let broker = DbBroker::new(&root);
    let db_path = school_db_path(&root);

    let result: Result<(), SchoolError> = broker.with_tx(&db_path, "tester", "counter.bump", |conn| {
        conn.execute("INSERT INTO counters(name, value) VALUES('probe', 1)", [])?;
        Err(SchoolError::BadRequest("abort".to_string()))
    });
    assert!(matches!(result, Err(SchoolError::BadRequest(_))));

    let remaining: i64 = broker
        .with_conn(&db_path, "tester", "counter.read", |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM counters WHERE name = 'probe'", [], |row| row.get(0))?)
        })
        .unwrap();
    assert_eq!(remaining, 0);

    broker
        .with_tx(&db_path, "tester", "counter.bump", |conn| {
            conn.execute("INSERT INTO counters(name, value) VALUES('probe', 1)", [])?;
            Ok(())
        })
        .unwrap();
    let kept: i64 = broker
        .with_conn(&db_path, "tester", "counter.read", |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM counters WHERE name = 'probe'", [], |row| row.get(0))?)
        })
        .unwrap();
    assert_eq!(kept, 1);
}

#[test]
fn test_constraint_violation_maps_to_conflict() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("data");
    initialize_school_db(&root).unwrap();
    let conn = db_connect(&school_db_path(&root).to_string_lossy()).unwrap();

    let err = conn
        .execute("INSERT INTO meta(key, value) VALUES('schema_version', 'x')", [])
        .unwrap_err();
    let mapped = conflict_on_constraint(err, "duplicate meta key");
    assert!(matches!(mapped, SchoolError::Conflict(_)));
    assert_eq!(mapped.kind().exit_code(), 5);

    let other = conflict_on_constraint(rusqlite::Error::InvalidQuery, "unused");
    assert!(matches!(other, SchoolError::RusqliteError(_)));
}

#[test]
fn test_config_defaults_without_file() {
    let tmp = tempdir().unwrap();
    let config = load_config(tmp.path()).unwrap();
    assert_eq!(config.school.certificate_prefix, "FS");
    assert_eq!(config.school.default_passing_score, 70);
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn test_config_found_from_project_or_store_root() {
    let tmp = tempdir().unwrap();
    let project_dir = tmp.path().join(".ecclesia");
    fs::create_dir_all(project_dir.join("data")).unwrap();
    fs::write(
        project_dir.join("config.toml"),
        "[school]\ndefault_passing_score = 80\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let from_project = load_config(tmp.path()).unwrap();
    assert_eq!(from_project.school.default_passing_score, 80);
    assert_eq!(from_project.logging.level, "debug");

    let from_store = load_config(&project_dir.join("data")).unwrap();
    assert_eq!(from_store.school.default_passing_score, 80);
    assert_eq!(from_store.school.certificate_prefix, "FS");
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = tempdir().unwrap();
    let project_dir = tmp.path().join(".ecclesia");
    fs::create_dir_all(&project_dir).unwrap();

    fs::write(project_dir.join("config.toml"), "[school\n").unwrap();
    assert!(matches!(load_config(tmp.path()), Err(SchoolError::ConfigError(_))));

    fs::write(project_dir.join("config.toml"), "[school]\ndefault_passing_score = 101\n").unwrap();
    assert!(matches!(load_config(tmp.path()), Err(SchoolError::ConfigError(_))));

    fs::write(project_dir.join("config.toml"), "[school]\ncertificate_prefix = \" \"\n").unwrap();
    assert!(matches!(load_config(tmp.path()), Err(SchoolError::ConfigError(_))));
}

#[test]
fn test_error_kinds_and_exit_codes() {
    let cases = [
        (SchoolError::NotFound("x".into()), ErrorKind::NotFound, 2),
        (SchoolError::BadRequest("x".into()), ErrorKind::BadRequest, 3),
        (SchoolError::Forbidden("x".into()), ErrorKind::Forbidden, 4),
        (SchoolError::Conflict("x".into()), ErrorKind::Conflict, 5),
        (SchoolError::RenderUnavailable("x".into()), ErrorKind::Internal, 1),
        (SchoolError::ConfigError("x".into()), ErrorKind::Internal, 1),
    ];
    for (err, kind, code) in cases {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.kind().exit_code(), code);
    }

    let io = SchoolError::IoError(std::io::Error::other("/secret/path unreadable"));
    assert_eq!(io.public_message(), "internal error");
    assert_eq!(ErrorKind::Forbidden.as_str(), "forbidden");
}
