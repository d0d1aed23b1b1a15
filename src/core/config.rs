//! Store configuration loaded from `.sortkey/config.toml`.

use crate::core::error::SortKeyError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Environment override for `store.actor`.
pub const ACTOR_ENV: &str = "SORTKEY_ACTOR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Actor name written to the audit log.
    #[serde(default = "default_actor")]
    pub actor: String,
    /// SQLite busy timeout for write connections.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
    /// Append broker events to `broker.events.jsonl`.
    #[serde(default = "default_audit")]
    pub audit: bool,
}

fn default_schema_version() -> String {
    CONFIG_SCHEMA_VERSION.to_string()
}

fn default_actor() -> String {
    "sortkey".to_string()
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_audit() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            actor: default_actor(),
            busy_timeout_secs: default_busy_timeout_secs(),
            audit: default_audit(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            store: StoreConfig::default(),
        }
    }
}

pub fn config_path(store_root: &Path) -> PathBuf {
    store_root.join(CONFIG_FILE_NAME)
}

/// Load the config for a store root. A missing file yields defaults.
pub fn load_config(store_root: &Path) -> Result<Config, SortKeyError> {
    let path = config_path(store_root);
    let mut config = if path.exists() {
        let content = fs::read_to_string(&path)?;
        toml::from_str::<Config>(&content)
            .map_err(|e| SortKeyError::ConfigError(format!("{}: {}", path.display(), e)))?
    } else {
        Config::default()
    };

    if let Ok(actor) = env::var(ACTOR_ENV) {
        if !actor.trim().is_empty() {
            config.store.actor = actor;
        }
    }
    Ok(config)
}

/// Write `config` to the store root, replacing any existing file.
pub fn write_config(store_root: &Path, config: &Config) -> Result<PathBuf, SortKeyError> {
    let path = config_path(store_root);
    let body = toml::to_string_pretty(config).map_err(|e| SortKeyError::ConfigError(e.to_string()))?;
    fs::write(&path, body)?;
    Ok(path)
}
