use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Single entry point for state access.
///
/// Every call is serialized through a process-wide lock, opens a fresh
/// connection, and appends one line to `broker.events.jsonl`.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

static DB_LOCK: Mutex<()> = Mutex::new(());

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("broker.events.jsonl"),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::SchoolError>
    where
        F: FnOnce(&Connection) -> Result<R, error::SchoolError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let conn = db::db_connect(&db_path.to_string_lossy())?;
        let result = f(&conn);

        self.finish(db_path, actor, op_name, result)
    }

    /// Like [`with_conn`](Self::with_conn) but inside a `BEGIN IMMEDIATE`
    /// transaction: committed on `Ok`, rolled back on `Err`.
    pub fn with_tx<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::SchoolError>
    where
        F: FnOnce(&Connection) -> Result<R, error::SchoolError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let conn = db::db_connect(&db_path.to_string_lossy())?;
        let result = run_immediate(&conn, f);

        self.finish(db_path, actor, op_name, result)
    }

    fn finish<R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        result: Result<R, error::SchoolError>,
    ) -> Result<R, error::SchoolError> {
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, &db_id, status)?;
        result
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::SchoolError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::SchoolError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::SchoolError::IoError)?;
        Ok(())
    }
}

fn run_immediate<F, R>(conn: &Connection, f: F) -> Result<R, error::SchoolError>
where
    F: FnOnce(&Connection) -> Result<R, error::SchoolError>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Serialized state access with an append-only audit log",
        "commands": [],
        "storage": ["broker.events.jsonl"]
    })
}
