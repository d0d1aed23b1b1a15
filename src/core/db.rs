use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn db_connect(db_path: &str, busy_timeout_secs: u64) -> Result<Connection, error::SortKeyError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))
        .map_err(error::SortKeyError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::SortKeyError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::SortKeyError::RusqliteError)?;
    Ok(conn)
}

pub fn library_db_path(root: &Path) -> PathBuf {
    root.join(schemas::LIBRARY_DB_NAME)
}

pub fn initialize_library_db(store: &Store) -> Result<(), error::SortKeyError> {
    let db_path = library_db_path(&store.root);
    let parent_dir = db_path.parent().ok_or_else(|| {
        error::SortKeyError::DatabaseInitializationError(format!(
            "no parent directory for {}",
            db_path.display()
        ))
    })?;
    fs::create_dir_all(parent_dir).map_err(error::SortKeyError::IoError)?;

    let broker = DbBroker::new(store);
    broker.with_tx(&db_path, None, "library.init", |conn| {
        for stmt in schemas::LIBRARY_DB_SCHEMA {
            conn.execute(stmt, [])?;
        }
        Ok(())
    })
}
