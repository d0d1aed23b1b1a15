//! Promoted content: curated, ordered groups of activities.
//!
//! Two kinds of scope are ordered here. The groups themselves form one global
//! scope, and the entries of each group form a scope of their own.

use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::position::{self, Shift};
use crate::core::scope::{self, OrderedScope, Placement};
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Parser, Debug)]
#[clap(name = "promoted", about = "Curate ordered groups of promoted activities.")]
pub struct PromotedCli {
    #[clap(subcommand)]
    pub command: PromotedCommand,
}

#[derive(Subcommand, Debug)]
pub enum PromotedCommand {
    /// Add a group after all existing groups.
    AddGroup {
        #[clap(long)]
        name: String,
    },
    /// Rename a group or change its flags.
    UpdateGroup {
        #[clap(long)]
        id: i64,
        #[clap(long)]
        name: String,
        #[clap(long)]
        homepage: bool,
        #[clap(long)]
        featured: bool,
    },
    /// Move a group to a zero-based position.
    MoveGroup {
        #[clap(long)]
        id: i64,
        #[clap(long, allow_hyphen_values = true)]
        position: String,
    },
    /// Delete a group together with its entries.
    DeleteGroup {
        #[clap(long)]
        id: i64,
    },
    /// Promote an activity at the end of a group.
    Add {
        #[clap(long)]
        group: i64,
        #[clap(long)]
        activity: i64,
    },
    /// Move a promoted activity to a zero-based position in its group.
    Move {
        #[clap(long)]
        group: i64,
        #[clap(long)]
        activity: i64,
        #[clap(long, allow_hyphen_values = true)]
        position: String,
    },
    /// Remove an activity from a group.
    Remove {
        #[clap(long)]
        group: i64,
        #[clap(long)]
        activity: i64,
    },
    /// List groups and their entries in display order.
    List {
        /// Include groups that are not currently featured.
        #[clap(long)]
        all: bool,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PromotedEntry {
    pub activity_id: i64,
    pub name: String,
    pub sort_index: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PromotedGroup {
    pub id: i64,
    pub group_name: String,
    pub sort_index: i64,
    pub homepage: bool,
    pub currently_featured: bool,
    #[serde(default)]
    pub entries: Vec<PromotedEntry>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct GroupMove {
    pub group_id: i64,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct EntryMove {
    pub group_id: i64,
    pub activity_id: i64,
    #[serde(flatten)]
    pub placement: Placement,
}

/// Every group, ordered globally.
pub struct GroupListScope {
    pub moving_id: Option<i64>,
}

impl OrderedScope for GroupListScope {
    fn current_keys(&self, conn: &Connection) -> Result<Vec<i64>, error::SortKeyError> {
        let mut stmt =
            conn.prepare("SELECT sort_index FROM promoted_groups WHERE id != ?1 ORDER BY sort_index ASC")?;
        let rows = stmt.query_map(params![self.moving_id.unwrap_or(0)], |row| row.get(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn apply_shift(&self, conn: &Connection, shift: Shift) -> Result<usize, error::SortKeyError> {
        let sql = format!(
            "UPDATE promoted_groups SET sort_index = sort_index + ?1 WHERE id != ?2 AND sort_index {} ?3",
            shift.range.sql_operator()
        );
        Ok(conn.execute(
            &sql,
            params![shift.direction.delta(), self.moving_id.unwrap_or(0), shift.range.bound()],
        )?)
    }

    fn max_key(&self, conn: &Connection) -> Result<Option<i64>, error::SortKeyError> {
        Ok(conn.query_row("SELECT MAX(sort_index) FROM promoted_groups", [], |row| row.get(0))?)
    }

    fn label(&self) -> String {
        "promoted_groups".to_string()
    }
}

/// Entries of one group whose activity is still live, the same set
/// `list_groups` shows. Max key still counts hidden entries.
pub struct GroupEntriesScope {
    pub group_id: i64,
    pub moving_activity_id: Option<i64>,
}

impl OrderedScope for GroupEntriesScope {
    fn current_keys(&self, conn: &Connection) -> Result<Vec<i64>, error::SortKeyError> {
        let mut stmt = conn.prepare(
            "SELECT sort_index FROM promoted_content
             WHERE group_id = ?1 AND activity_id != ?2
               AND activity_id IN (SELECT id FROM content WHERE is_deleted = 0)
             ORDER BY sort_index ASC",
        )?;
        let rows = stmt.query_map(
            params![self.group_id, self.moving_activity_id.unwrap_or(0)],
            |row| row.get(0),
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn apply_shift(&self, conn: &Connection, shift: Shift) -> Result<usize, error::SortKeyError> {
        let sql = format!(
            "UPDATE promoted_content SET sort_index = sort_index + ?1
             WHERE group_id = ?2 AND activity_id != ?3
               AND activity_id IN (SELECT id FROM content WHERE is_deleted = 0)
               AND sort_index {} ?4",
            shift.range.sql_operator()
        );
        Ok(conn.execute(
            &sql,
            params![
                shift.direction.delta(),
                self.group_id,
                self.moving_activity_id.unwrap_or(0),
                shift.range.bound()
            ],
        )?)
    }

    fn max_key(&self, conn: &Connection) -> Result<Option<i64>, error::SortKeyError> {
        Ok(conn.query_row(
            "SELECT MAX(sort_index) FROM promoted_content WHERE group_id = ?1",
            params![self.group_id],
            |row| row.get(0),
        )?)
    }

    fn label(&self) -> String {
        format!("promoted_content(group={})", self.group_id)
    }
}

fn require_group(conn: &Connection, group_id: i64) -> Result<(), error::SortKeyError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM promoted_groups WHERE id = ?1",
            params![group_id],
            |row| row.get(0),
        )
        .optional()?;
    exists
        .map(|_| ())
        .ok_or_else(|| error::SortKeyError::NotFound(format!("promoted group {}", group_id)))
}

fn require_promotable(conn: &Connection, activity_id: i64) -> Result<(), error::SortKeyError> {
    let ok: Option<i64> = conn
        .query_row(
            "SELECT id FROM content WHERE id = ?1 AND is_folder = 0 AND is_deleted = 0",
            params![activity_id],
            |row| row.get(0),
        )
        .optional()?;
    ok.map(|_| ()).ok_or_else(|| {
        error::SortKeyError::ValidationError(format!(
            "activity {} does not exist or is not an activity",
            activity_id
        ))
    })
}

fn entry_exists(conn: &Connection, group_id: i64, activity_id: i64) -> Result<bool, error::SortKeyError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT sort_index FROM promoted_content WHERE group_id = ?1 AND activity_id = ?2",
            params![group_id, activity_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn require_entry(conn: &Connection, group_id: i64, activity_id: i64) -> Result<(), error::SortKeyError> {
    if entry_exists(conn, group_id, activity_id)? {
        return Ok(());
    }
    Err(error::SortKeyError::NotFound(format!(
        "activity {} in promoted group {}",
        activity_id, group_id
    )))
}

fn map_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromotedGroup> {
    Ok(PromotedGroup {
        id: row.get(0)?,
        group_name: row.get(1)?,
        sort_index: row.get(2)?,
        homepage: row.get::<_, i64>(3)? != 0,
        currently_featured: row.get::<_, i64>(4)? != 0,
        entries: Vec::new(),
    })
}

fn validate_group_name(name: &str) -> Result<String, error::SortKeyError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(error::SortKeyError::ValidationError(
            "group name must not be empty".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn reject_duplicate_name(conn: &Connection, name: &str, except: i64) -> Result<(), error::SortKeyError> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM promoted_groups WHERE group_name = ?1 AND id != ?2",
            params![name, except],
            |row| row.get(0),
        )
        .optional()?;
    match taken {
        Some(id) => Err(error::SortKeyError::ValidationError(format!(
            "group name '{}' is already used by group {}",
            name, id
        ))),
        None => Ok(()),
    }
}

pub fn add_group(store: &Store, group_name: &str) -> Result<PromotedGroup, error::SortKeyError> {
    let group_name = validate_group_name(group_name)?;
    let broker = DbBroker::new(store);

    broker.with_tx(&store.library_db_path(), None, "promoted.add_group", |conn| {
        reject_duplicate_name(conn, &group_name, 0)?;
        let sort_index = scope::append_key(conn, &GroupListScope { moving_id: None })?;
        conn.execute(
            "INSERT INTO promoted_groups(group_name, sort_index, homepage, currently_featured)
             VALUES(?1, ?2, 0, 0)",
            params![group_name, sort_index],
        )?;
        Ok(PromotedGroup {
            id: conn.last_insert_rowid(),
            group_name,
            sort_index,
            homepage: false,
            currently_featured: false,
            entries: Vec::new(),
        })
    })
}

pub fn update_group(
    store: &Store,
    group_id: i64,
    group_name: &str,
    homepage: bool,
    currently_featured: bool,
) -> Result<(), error::SortKeyError> {
    let group_name = validate_group_name(group_name)?;
    let broker = DbBroker::new(store);

    broker.with_tx(&store.library_db_path(), None, "promoted.update_group", |conn| {
        require_group(conn, group_id)?;
        reject_duplicate_name(conn, &group_name, group_id)?;
        conn.execute(
            "UPDATE promoted_groups SET group_name = ?1, homepage = ?2, currently_featured = ?3 WHERE id = ?4",
            params![group_name, homepage, currently_featured, group_id],
        )?;
        Ok(())
    })
}

/// Delete a group and its entries in one transaction.
pub fn delete_group(store: &Store, group_id: i64) -> Result<usize, error::SortKeyError> {
    let broker = DbBroker::new(store);

    broker.with_tx(&store.library_db_path(), None, "promoted.delete_group", |conn| {
        require_group(conn, group_id)?;
        let entries = conn.execute(
            "DELETE FROM promoted_content WHERE group_id = ?1",
            params![group_id],
        )?;
        conn.execute("DELETE FROM promoted_groups WHERE id = ?1", params![group_id])?;
        Ok(entries)
    })
}

pub fn move_group(store: &Store, group_id: i64, desired_position: i64) -> Result<GroupMove, error::SortKeyError> {
    let broker = DbBroker::new(store);
    let db_path = store.library_db_path();
    let intent_ref = format!("intent:promoted.move_group:{}", Ulid::new());

    let (outcome, detail) = broker.with_tx(&db_path, Some(&intent_ref), "promoted.move_group", |conn| {
        require_group(conn, group_id)?;
        let scope = GroupListScope {
            moving_id: Some(group_id),
        };
        let placement = scope::place(conn, &scope, desired_position)?;
        conn.execute(
            "UPDATE promoted_groups SET sort_index = ?1 WHERE id = ?2",
            params![placement.sort_index, group_id],
        )?;
        let detail = scope::shift_detail(&scope, &placement);
        Ok((GroupMove { group_id, placement }, detail))
    })?;

    if let Some(detail) = detail {
        broker.record(&db_path, Some(&intent_ref), "promoted.shift", detail);
    }
    Ok(outcome)
}

pub fn add_promoted(store: &Store, group_id: i64, activity_id: i64) -> Result<PromotedEntry, error::SortKeyError> {
    let broker = DbBroker::new(store);

    broker.with_tx(&store.library_db_path(), None, "promoted.add", |conn| {
        require_group(conn, group_id)?;
        require_promotable(conn, activity_id)?;
        if entry_exists(conn, group_id, activity_id)? {
            return Err(error::SortKeyError::ValidationError(format!(
                "activity {} is already promoted in group {}",
                activity_id, group_id
            )));
        }
        let scope = GroupEntriesScope {
            group_id,
            moving_activity_id: None,
        };
        let sort_index = scope::append_key(conn, &scope)?;
        conn.execute(
            "INSERT INTO promoted_content(group_id, activity_id, sort_index) VALUES(?1, ?2, ?3)",
            params![group_id, activity_id, sort_index],
        )?;
        let name: String = conn.query_row(
            "SELECT name FROM content WHERE id = ?1",
            params![activity_id],
            |row| row.get(0),
        )?;
        Ok(PromotedEntry {
            activity_id,
            name,
            sort_index,
        })
    })
}

pub fn move_promoted(
    store: &Store,
    group_id: i64,
    activity_id: i64,
    desired_position: i64,
) -> Result<EntryMove, error::SortKeyError> {
    let broker = DbBroker::new(store);
    let db_path = store.library_db_path();
    let intent_ref = format!("intent:promoted.move:{}", Ulid::new());

    let (outcome, detail) = broker.with_tx(&db_path, Some(&intent_ref), "promoted.move", |conn| {
        require_entry(conn, group_id, activity_id)?;
        let scope = GroupEntriesScope {
            group_id,
            moving_activity_id: Some(activity_id),
        };
        let placement = scope::place(conn, &scope, desired_position)?;
        conn.execute(
            "UPDATE promoted_content SET sort_index = ?1 WHERE group_id = ?2 AND activity_id = ?3",
            params![placement.sort_index, group_id, activity_id],
        )?;
        let detail = scope::shift_detail(&scope, &placement);
        Ok((
            EntryMove {
                group_id,
                activity_id,
                placement,
            },
            detail,
        ))
    })?;

    if let Some(detail) = detail {
        broker.record(&db_path, Some(&intent_ref), "promoted.shift", detail);
    }
    Ok(outcome)
}

pub fn remove_promoted(store: &Store, group_id: i64, activity_id: i64) -> Result<(), error::SortKeyError> {
    let broker = DbBroker::new(store);

    broker.with_tx(&store.library_db_path(), None, "promoted.remove", |conn| {
        require_entry(conn, group_id, activity_id)?;
        conn.execute(
            "DELETE FROM promoted_content WHERE group_id = ?1 AND activity_id = ?2",
            params![group_id, activity_id],
        )?;
        Ok(())
    })
}

/// Groups in display order with their entries. Unfeatured groups are only
/// included when `include_unfeatured` is set.
pub fn list_groups(store: &Store, include_unfeatured: bool) -> Result<Vec<PromotedGroup>, error::SortKeyError> {
    let broker = DbBroker::new(store);

    broker.with_read(&store.library_db_path(), |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, group_name, sort_index, homepage, currently_featured FROM promoted_groups
             WHERE ?1 OR currently_featured = 1
             ORDER BY sort_index ASC",
        )?;
        let rows = stmt.query_map(params![include_unfeatured], map_group_row)?;
        let mut groups = Vec::new();
        for r in rows {
            groups.push(r?);
        }

        let mut entry_stmt = conn.prepare(
            "SELECT pc.activity_id, c.name, pc.sort_index
             FROM promoted_content AS pc INNER JOIN content AS c ON c.id = pc.activity_id
             WHERE pc.group_id = ?1 AND c.is_deleted = 0
             ORDER BY pc.sort_index ASC",
        )?;
        for group in &mut groups {
            let entries = entry_stmt.query_map(params![group.id], |row| {
                Ok(PromotedEntry {
                    activity_id: row.get(0)?,
                    name: row.get(1)?,
                    sort_index: row.get(2)?,
                })
            })?;
            for e in entries {
                group.entries.push(e?);
            }
        }
        Ok(groups)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "promoted",
        "version": "0.1.0",
        "description": "Ordered promoted-content groups and their ordered entries",
        "commands": [
            { "name": "add-group", "parameters": ["name"] },
            { "name": "update-group", "parameters": ["id", "name", "homepage", "featured"] },
            { "name": "move-group", "parameters": ["id", "position"] },
            { "name": "delete-group", "parameters": ["id"] },
            { "name": "add", "parameters": ["group", "activity"] },
            { "name": "move", "parameters": ["group", "activity", "position"] },
            { "name": "remove", "parameters": ["group", "activity"] },
            { "name": "list", "parameters": ["all"] }
        ],
        "storage": ["library.db"]
    })
}

pub fn run_promoted_cli(store: &Store, cli: PromotedCli) -> Result<serde_json::Value, error::SortKeyError> {
    let out = match cli.command {
        PromotedCommand::AddGroup { name } => {
            let group = add_group(store, &name)?;
            time::command_envelope("promoted.add-group", "ok", serde_json::json!({ "group": group }))
        }
        PromotedCommand::UpdateGroup {
            id,
            name,
            homepage,
            featured,
        } => {
            update_group(store, id, &name, homepage, featured)?;
            time::command_envelope("promoted.update-group", "ok", serde_json::json!({ "id": id }))
        }
        PromotedCommand::MoveGroup { id, position: raw } => {
            let desired = position::parse_desired_position(&raw)?;
            let moved = move_group(store, id, desired)?;
            time::command_envelope("promoted.move-group", "ok", serde_json::json!({ "moved": moved }))
        }
        PromotedCommand::DeleteGroup { id } => {
            let entries = delete_group(store, id)?;
            time::command_envelope(
                "promoted.delete-group",
                "ok",
                serde_json::json!({ "id": id, "deleted_entries": entries }),
            )
        }
        PromotedCommand::Add { group, activity } => {
            let entry = add_promoted(store, group, activity)?;
            time::command_envelope(
                "promoted.add",
                "ok",
                serde_json::json!({ "group": group, "entry": entry }),
            )
        }
        PromotedCommand::Move {
            group,
            activity,
            position: raw,
        } => {
            let desired = position::parse_desired_position(&raw)?;
            let moved = move_promoted(store, group, activity, desired)?;
            time::command_envelope("promoted.move", "ok", serde_json::json!({ "moved": moved }))
        }
        PromotedCommand::Remove { group, activity } => {
            remove_promoted(store, group, activity)?;
            time::command_envelope(
                "promoted.remove",
                "ok",
                serde_json::json!({ "group": group, "activity": activity }),
            )
        }
        PromotedCommand::List { all } => {
            let groups = list_groups(store, all)?;
            time::command_envelope("promoted.list", "ok", serde_json::json!({ "groups": groups }))
        }
    };
    Ok(out)
}
