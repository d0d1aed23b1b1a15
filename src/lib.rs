//! sortkey: user-defined ordering with fractional position keys.
//!
//! Every ordered item (a folder entry, a promoted group, a promoted activity)
//! carries an integer sort index that is only meaningful relative to its
//! siblings. Reordering picks a key between the new neighbours, so a move
//! normally rewrites a single row. When neighbours are adjacent integers, one
//! side of the scope is shifted by a large constant first.
//!
//! # Architecture
//!
//! ## The allocator
//!
//! [`core::position::allocate`] is pure: it takes the scope's current keys,
//! a target index and a shift callback, and returns the new key. It has no
//! knowledge of tables, owners or folders.
//!
//! ## The broker
//!
//! All mutations go through [`core::broker::DbBroker`], which serializes
//! writers per database, wraps each operation in one `BEGIN IMMEDIATE`
//! transaction and appends an audit line to `broker.events.jsonl`. Reading a
//! scope's keys, shifting them and writing the moved row happen inside a
//! single broker transaction.
//!
//! ## Subsystems
//!
//! - `content`: folders and activities, ordered per owner and parent folder
//! - `promoted`: promoted groups (one global order) and their entries
//!
//! # Examples
//!
//! ```bash
//! sortkey init
//! sortkey content create-folder --owner 1
//! sortkey content move --owner 1 --id 3 --position 0
//! sortkey allocate --keys 10,11 --position 1
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: allocator, store, broker, config and errors
//! - [`plugins`]: the ordered subsystems

pub mod core;
pub mod plugins;

use crate::core::{
    broker, error,
    position::{self, Shift},
    store::{self, Store},
    time,
};
use crate::plugins::{library, promoted};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "sortkey",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fractional position keys for user-ordered content"
)]
struct Cli {
    /// Project directory containing `.sortkey/` (defaults to searching upward from the cwd).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create `.sortkey/` with a default config and an empty library database.
    Init {
        /// Directory to initialize (defaults to current working directory).
        #[clap(short, long)]
        dir: Option<PathBuf>,
    },

    /// Compute a key without touching any store.
    Allocate(AllocateCli),

    /// Folder contents
    Content(library::ContentCli),

    /// Promoted groups and entries
    Promoted(promoted::PromotedCli),

    /// Show the broker audit log
    Audit {
        /// Only show the last N events.
        #[clap(long)]
        tail: Option<usize>,
    },

    /// Print JSON schemas for all subsystems
    Schema,
}

#[derive(clap::Args, Debug)]
struct AllocateCli {
    /// Current keys of the scope, ascending, comma separated (empty for an empty scope).
    #[clap(long, default_value = "", allow_hyphen_values = true)]
    keys: String,
    /// Zero-based target index.
    #[clap(long, allow_hyphen_values = true)]
    position: String,
}

fn parse_keys(raw: &str) -> Result<Vec<i64>, error::SortKeyError> {
    let keys = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| error::SortKeyError::ValidationError(format!("invalid key '{}'", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(error::SortKeyError::ValidationError(
            "keys must be strictly ascending".into(),
        ));
    }
    Ok(keys)
}

/// Run the allocator against an in-memory key list, applying any requested
/// shift to a copy so the resulting order can be shown.
fn run_allocate(cli: &AllocateCli) -> Result<serde_json::Value, error::SortKeyError> {
    let keys = parse_keys(&cli.keys)?;
    let desired = position::parse_desired_position(&cli.position)?;
    let mut requested: Option<Shift> = None;
    let key = position::allocate(&keys, desired, |shift| {
        requested = Some(shift);
        Ok(())
    })?;

    let mut resulting: Vec<i64> = keys
        .iter()
        .map(|k| requested.map_or(*k, |s| s.apply(*k)))
        .collect();
    resulting.push(key);
    resulting.sort_unstable();

    Ok(time::command_envelope(
        "allocate",
        "ok",
        serde_json::json!({
            "key": key,
            "shift": requested,
            "resulting_keys": resulting,
        }),
    ))
}

fn resolve_store(root: Option<&Path>) -> Result<Store, error::SortKeyError> {
    let store_root = match root {
        Some(dir) => dir.join(store::STORE_DIR_NAME),
        None => store::find_store_root(&std::env::current_dir()?)?,
    };
    Store::open(&store_root)
}

pub fn run() -> Result<(), error::SortKeyError> {
    let cli = Cli::parse();

    let out = match cli.command {
        Command::Init { dir } => {
            let dir = match dir.or(cli.root) {
                Some(d) => d,
                None => std::env::current_dir()?,
            };
            let opened = store::init_store(&dir)?;
            time::command_envelope(
                "init",
                "ok",
                serde_json::json!({ "root": opened.root.to_string_lossy() }),
            )
        }
        Command::Allocate(allocate_cli) => run_allocate(&allocate_cli)?,
        Command::Content(content_cli) => {
            let store = resolve_store(cli.root.as_deref())?;
            library::run_content_cli(&store, content_cli)?
        }
        Command::Promoted(promoted_cli) => {
            let store = resolve_store(cli.root.as_deref())?;
            promoted::run_promoted_cli(&store, promoted_cli)?
        }
        Command::Audit { tail } => {
            let store = resolve_store(cli.root.as_deref())?;
            let mut events = broker::read_audit_log(&store)?;
            if let Some(n) = tail {
                let skip = events.len().saturating_sub(n);
                events.drain(..skip);
            }
            time::command_envelope("audit", "ok", serde_json::json!({ "events": events }))
        }
        Command::Schema => {
            let mut schemas = serde_json::Map::new();
            schemas.insert("broker".into(), broker::schema());
            schemas.insert("content".into(), library::schema());
            schemas.insert("promoted".into(), promoted::schema());
            time::command_envelope("schema", "ok", serde_json::json!({ "schemas": schemas }))
        }
    };

    let rendered = serde_json::to_string_pretty(&out)
        .map_err(|e| error::SortKeyError::ValidationError(format!("output encoding: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
