use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::SchoolError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::SchoolError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::SchoolError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::SchoolError::RusqliteError)?;
    Ok(conn)
}

pub fn school_db_path(root: &Path) -> PathBuf {
    root.join(schemas::SCHOOL_DB_NAME)
}

/// Creates the store directory and every table. Safe to call repeatedly.
pub fn initialize_school_db(root: &Path) -> Result<(), error::SchoolError> {
    fs::create_dir_all(root).map_err(error::SchoolError::IoError)?;
    let db_path = school_db_path(root);

    let broker = DbBroker::new(root);
    broker.with_conn(&db_path, "ecclesia", "school.init", |conn| {
        for ddl in schemas::SCHOOL_DB_SCHEMA {
            conn.execute_batch(ddl)?;
        }
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', ?1)",
            [schemas::SCHOOL_SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    })?;

    tracing::debug!(path = %db_path.display(), "school database ready");
    Ok(())
}
