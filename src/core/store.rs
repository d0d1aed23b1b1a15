//! Store discovery and initialization.
//!
//! A store is a `.sortkey/` directory holding `config.toml`, `library.db`
//! and the broker audit log. Commands locate it by walking up from the
//! current directory, the way `git` finds `.git/`.

use crate::core::config::{self, Config};
use crate::core::db;
use crate::core::error::SortKeyError;
use std::fs;
use std::path::{Path, PathBuf};

pub const STORE_DIR_NAME: &str = ".sortkey";

/// Handle to an opened store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the `.sortkey` directory
    pub root: PathBuf,
    /// Config loaded from `root/config.toml` (defaults when absent)
    pub config: Config,
}

impl Store {
    /// Open the store rooted at `root` (the `.sortkey` directory itself).
    pub fn open(root: &Path) -> Result<Self, SortKeyError> {
        if !root.is_dir() {
            return Err(SortKeyError::NotFound(format!(
                "store directory {} does not exist. Run `sortkey init` first.",
                root.display()
            )));
        }
        let config = config::load_config(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn library_db_path(&self) -> PathBuf {
        db::library_db_path(&self.root)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join("broker.events.jsonl")
    }
}

/// Walk up from `start_dir` to the first directory containing `.sortkey`.
pub fn find_store_root(start_dir: &Path) -> Result<PathBuf, SortKeyError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        let candidate = current_dir.join(STORE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current_dir.pop() {
            return Err(SortKeyError::NotFound(
                "'.sortkey' directory not found in current or parent directories. Run `sortkey init` first.".to_string(),
            ));
        }
    }
}

/// Create `<dir>/.sortkey` with a default config and an initialized database.
/// An existing config is left untouched.
pub fn init_store(dir: &Path) -> Result<Store, SortKeyError> {
    let root = dir.join(STORE_DIR_NAME);
    fs::create_dir_all(&root)?;
    if !config::config_path(&root).exists() {
        config::write_config(&root, &Config::default())?;
    }
    let store = Store::open(&root)?;
    db::initialize_library_db(&store)?;
    Ok(store)
}
