use crate::core::db;
use crate::core::error::SortKeyError;
use crate::core::store::Store;
use crate::core::time;
use colored::Colorize;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// The DB Broker is the single path for state mutation.
///
/// Each `with_tx` call is one atomic unit: writers of the same database are
/// serialized in-process by a per-DB mutex and across processes by
/// `BEGIN IMMEDIATE`, so reading a scope's keys, shifting them and writing
/// the moved item cannot interleave with another writer.
pub struct DbBroker {
    audit_log_path: PathBuf,
    actor: String,
    audit: bool,
    busy_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub intent_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

fn write_lock_for(db_path: &Path) -> Result<Arc<Mutex<()>>, SortKeyError> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .map_err(|_| SortKeyError::ValidationError("broker lock table poisoned".to_string()))?;
    Ok(locks
        .entry(db_path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone())
}

/// Dropping the transaction on the error path rolls it back.
fn run_immediate<F, R>(conn: &mut Connection, f: F) -> Result<R, SortKeyError>
where
    F: FnOnce(&Connection) -> Result<R, SortKeyError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

fn db_id(db_path: &Path) -> String {
    db_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

impl DbBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            audit_log_path: store.audit_log_path(),
            actor: store.config.store.actor.clone(),
            audit: store.config.store.audit,
            busy_timeout_secs: store.config.store.busy_timeout_secs,
        }
    }

    /// Run `f` inside one serialized write transaction on `db_path`.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. The outcome is
    /// appended to the audit log either way.
    pub fn with_tx<F, R>(
        &self,
        db_path: &Path,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, SortKeyError>
    where
        F: FnOnce(&Connection) -> Result<R, SortKeyError>,
    {
        let lock = write_lock_for(db_path)?;
        let _guard = lock
            .lock()
            .map_err(|_| SortKeyError::ValidationError("broker write lock poisoned".to_string()))?;

        let mut conn = db::db_connect(&db_path.to_string_lossy(), self.busy_timeout_secs)?;
        let result = run_immediate(&mut conn, f);

        let status = if result.is_ok() { "success" } else { "error" };
        self.append_audit(intent_ref, op_name, &db_id(db_path), status, None);

        result
    }

    /// Run `f` on a fresh read connection. Reads are not serialized and not audited.
    pub fn with_read<F, R>(&self, db_path: &Path, f: F) -> Result<R, SortKeyError>
    where
        F: FnOnce(&Connection) -> Result<R, SortKeyError>,
    {
        let conn = db::db_connect(&db_path.to_string_lossy(), self.busy_timeout_secs)?;
        f(&conn)
    }

    /// Append an event with structured `detail` (shifts, allocated keys).
    pub fn record(&self, db_path: &Path, intent_ref: Option<&str>, op_name: &str, detail: JsonValue) {
        self.append_audit(intent_ref, op_name, &db_id(db_path), "success", Some(detail));
    }

    /// The mutation is already committed (or rolled back) when this runs, so a
    /// failed audit write is reported on stderr and does not change the result.
    fn append_audit(&self, intent_ref: Option<&str>, op: &str, db_id: &str, status: &str, detail: Option<JsonValue>) {
        if let Err(e) = self.log_event(intent_ref, op, db_id, status, detail) {
            eprintln!(
                "{} audit log write failed for {}: {}",
                "warning:".yellow().bold(),
                op,
                e
            );
        }
    }

    fn log_event(
        &self,
        intent_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
        detail: Option<JsonValue>,
    ) -> Result<(), SortKeyError> {
        if !self.audit {
            return Ok(());
        }

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: self.actor.clone(),
            intent_ref: intent_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
            detail,
        };

        let mut line = serde_json::to_string(&ev)
            .map_err(|e| SortKeyError::ValidationError(format!("audit event encoding: {}", e)))?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(SortKeyError::IoError)?;

        // one write per event keeps concurrent appends line-atomic
        f.write_all(line.as_bytes()).map_err(SortKeyError::IoError)?;
        Ok(())
    }
}

/// Read back the audit log, oldest first.
pub fn read_audit_log(store: &Store) -> Result<Vec<BrokerEvent>, SortKeyError> {
    let path = store.audit_log_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str::<BrokerEvent>(l)
                .map_err(|e| SortKeyError::ValidationError(format!("bad audit line: {}", e)))
        })
        .collect()
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Serialized, transactional state mutation with an audit trail",
        "commands": [
            { "name": "audit", "description": "Show the mutation audit log" }
        ],
        "storage": ["broker.events.jsonl"]
    })
}
