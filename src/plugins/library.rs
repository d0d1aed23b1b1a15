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
#[clap(name = "content", about = "Create, order and move folder contents.")]
pub struct ContentCli {
    #[clap(subcommand)]
    pub command: ContentCommand,
}

#[derive(Subcommand, Debug)]
pub enum ContentCommand {
    /// Create a folder at the end of its parent folder.
    CreateFolder {
        #[clap(long)]
        owner: i64,
        /// Parent folder id (omit for the owner's root).
        #[clap(long)]
        parent: Option<i64>,
        #[clap(long)]
        name: Option<String>,
    },
    /// Create an activity at the end of its parent folder.
    CreateActivity {
        #[clap(long)]
        owner: i64,
        #[clap(long)]
        parent: Option<i64>,
        #[clap(long)]
        name: Option<String>,
    },
    /// Move an item to a zero-based position inside a folder.
    Move {
        #[clap(long)]
        owner: i64,
        #[clap(long)]
        id: i64,
        /// Destination folder id (omit for the owner's root).
        #[clap(long)]
        parent: Option<i64>,
        #[clap(long, allow_hyphen_values = true)]
        position: String,
    },
    /// List a folder in display order.
    List {
        #[clap(long)]
        owner: i64,
        #[clap(long)]
        parent: Option<i64>,
    },
    /// Soft-delete an item (and, for folders, everything beneath it).
    Delete {
        #[clap(long)]
        owner: i64,
        #[clap(long)]
        id: i64,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub id: i64,
    pub owner_id: i64,
    pub parent_folder_id: Option<i64>,
    pub is_folder: bool,
    pub name: String,
    pub sort_index: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub id: i64,
    pub parent_folder_id: Option<i64>,
    #[serde(flatten)]
    pub placement: Placement,
}

/// Live children of one folder of one owner (`parent = None` is the root).
pub struct FolderScope {
    pub owner_id: i64,
    pub parent_folder_id: Option<i64>,
    /// Row being placed; excluded from the scope's keys and from shifts.
    pub moving_id: Option<i64>,
}

impl FolderScope {
    fn excluded(&self) -> i64 {
        // AUTOINCREMENT ids start at 1
        self.moving_id.unwrap_or(0)
    }
}

impl OrderedScope for FolderScope {
    fn current_keys(&self, conn: &Connection) -> Result<Vec<i64>, error::SortKeyError> {
        let mut stmt = conn.prepare(
            "SELECT sort_index FROM content
             WHERE owner_id = ?1 AND parent_folder_id IS ?2 AND id != ?3 AND is_deleted = 0
             ORDER BY sort_index ASC",
        )?;
        let rows = stmt.query_map(
            params![self.owner_id, self.parent_folder_id, self.excluded()],
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
            "UPDATE content SET sort_index = sort_index + ?1
             WHERE owner_id = ?2 AND parent_folder_id IS ?3 AND id != ?4 AND is_deleted = 0
               AND sort_index {} ?5",
            shift.range.sql_operator()
        );
        Ok(conn.execute(
            &sql,
            params![
                shift.direction.delta(),
                self.owner_id,
                self.parent_folder_id,
                self.excluded(),
                shift.range.bound()
            ],
        )?)
    }

    fn max_key(&self, conn: &Connection) -> Result<Option<i64>, error::SortKeyError> {
        // Deleted rows are included, so an append never reuses a deleted row's key.
        Ok(conn.query_row(
            "SELECT MAX(sort_index) FROM content WHERE owner_id = ?1 AND parent_folder_id IS ?2",
            params![self.owner_id, self.parent_folder_id],
            |row| row.get(0),
        )?)
    }

    fn label(&self) -> String {
        match self.parent_folder_id {
            Some(p) => format!("content(owner={},parent={})", self.owner_id, p),
            None => format!("content(owner={},parent=root)", self.owner_id),
        }
    }
}

fn map_content_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        parent_folder_id: row.get(2)?,
        is_folder: row.get::<_, i64>(3)? != 0,
        name: row.get(4)?,
        sort_index: row.get(5)?,
    })
}

fn fetch_live(conn: &Connection, owner_id: i64, id: i64) -> Result<Option<ContentItem>, error::SortKeyError> {
    Ok(conn
        .query_row(
            "SELECT id, owner_id, parent_folder_id, is_folder, name, sort_index FROM content
             WHERE id = ?1 AND owner_id = ?2 AND is_deleted = 0",
            params![id, owner_id],
            map_content_row,
        )
        .optional()?)
}

fn require_live_folder(conn: &Connection, owner_id: i64, folder_id: i64) -> Result<(), error::SortKeyError> {
    match fetch_live(conn, owner_id, folder_id)? {
        Some(item) if item.is_folder => Ok(()),
        Some(_) => Err(error::SortKeyError::ValidationError(format!(
            "content {} is not a folder",
            folder_id
        ))),
        None => Err(error::SortKeyError::NotFound(format!(
            "folder {} of owner {}",
            folder_id, owner_id
        ))),
    }
}

/// True when `candidate` is `folder_id` itself or lies somewhere beneath it.
fn is_within_folder(conn: &Connection, folder_id: i64, candidate: i64) -> Result<bool, error::SortKeyError> {
    if folder_id == candidate {
        return Ok(true);
    }
    let found: i64 = conn.query_row(
        "WITH RECURSIVE folder_tree(id) AS (
            SELECT id FROM content WHERE parent_folder_id = ?1 AND is_folder = 1
            UNION ALL
            SELECT c.id FROM content AS c
            INNER JOIN folder_tree AS ft ON c.parent_folder_id = ft.id
            WHERE c.is_folder = 1
        )
        SELECT EXISTS(SELECT 1 FROM folder_tree WHERE id = ?2)",
        params![folder_id, candidate],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

fn create_content(
    store: &Store,
    owner_id: i64,
    parent_folder_id: Option<i64>,
    is_folder: bool,
    name: Option<&str>,
) -> Result<ContentItem, error::SortKeyError> {
    let broker = DbBroker::new(store);
    let db_path = store.library_db_path();
    let name = match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ if is_folder => "Untitled Folder".to_string(),
        _ => "Untitled Activity".to_string(),
    };
    let op = if is_folder {
        "library.create_folder"
    } else {
        "library.create_activity"
    };

    broker.with_tx(&db_path, None, op, |conn| {
        if let Some(parent) = parent_folder_id {
            require_live_folder(conn, owner_id, parent)?;
        }
        let scope = FolderScope {
            owner_id,
            parent_folder_id,
            moving_id: None,
        };
        let sort_index = scope::append_key(conn, &scope)?;
        conn.execute(
            "INSERT INTO content(owner_id, parent_folder_id, is_folder, name, sort_index, is_deleted, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                owner_id,
                parent_folder_id,
                is_folder as i64,
                name,
                sort_index,
                time::now_epoch_z()
            ],
        )?;
        Ok(ContentItem {
            id: conn.last_insert_rowid(),
            owner_id,
            parent_folder_id,
            is_folder,
            name,
            sort_index,
        })
    })
}

pub fn create_folder(
    store: &Store,
    owner_id: i64,
    parent_folder_id: Option<i64>,
    name: Option<&str>,
) -> Result<ContentItem, error::SortKeyError> {
    create_content(store, owner_id, parent_folder_id, true, name)
}

pub fn create_activity(
    store: &Store,
    owner_id: i64,
    parent_folder_id: Option<i64>,
    name: Option<&str>,
) -> Result<ContentItem, error::SortKeyError> {
    create_content(store, owner_id, parent_folder_id, false, name)
}

/// Move content `id` of `owner_id` so it sits at zero-based `desired_position`
/// among the live children of `desired_parent` (`None` is the owner's root).
///
/// The destination may be the current folder (a reorder) or another one.
/// Folders cannot be moved into themselves or their own descendants.
pub fn move_content(
    store: &Store,
    owner_id: i64,
    id: i64,
    desired_parent: Option<i64>,
    desired_position: i64,
) -> Result<MoveOutcome, error::SortKeyError> {
    let broker = DbBroker::new(store);
    let db_path = store.library_db_path();
    let intent_ref = format!("intent:library.move:{}", Ulid::new());

    let (outcome, detail) = broker.with_tx(&db_path, Some(&intent_ref), "library.move", |conn| {
        let item = fetch_live(conn, owner_id, id)?.ok_or_else(|| {
            error::SortKeyError::NotFound(format!("content {} of owner {}", id, owner_id))
        })?;

        if let Some(parent) = desired_parent {
            require_live_folder(conn, owner_id, parent)?;
            if item.is_folder && is_within_folder(conn, item.id, parent)? {
                return Err(error::SortKeyError::ValidationError(format!(
                    "cannot move folder {} into itself or one of its subfolders",
                    item.id
                )));
            }
        }

        let scope = FolderScope {
            owner_id,
            parent_folder_id: desired_parent,
            moving_id: Some(item.id),
        };
        let placement = scope::place(conn, &scope, desired_position)?;
        conn.execute(
            "UPDATE content SET sort_index = ?1, parent_folder_id = ?2 WHERE id = ?3",
            params![placement.sort_index, desired_parent, item.id],
        )?;

        let detail = scope::shift_detail(&scope, &placement);
        Ok((
            MoveOutcome {
                id: item.id,
                parent_folder_id: desired_parent,
                placement,
            },
            detail,
        ))
    })?;

    if let Some(detail) = detail {
        broker.record(&db_path, Some(&intent_ref), "library.shift", detail);
    }
    Ok(outcome)
}

pub fn list_folder(
    store: &Store,
    owner_id: i64,
    parent_folder_id: Option<i64>,
) -> Result<Vec<ContentItem>, error::SortKeyError> {
    let broker = DbBroker::new(store);
    broker.with_read(&store.library_db_path(), |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, parent_folder_id, is_folder, name, sort_index FROM content
             WHERE owner_id = ?1 AND parent_folder_id IS ?2 AND is_deleted = 0
             ORDER BY sort_index ASC",
        )?;
        let rows = stmt.query_map(params![owner_id, parent_folder_id], map_content_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

pub fn get_content(store: &Store, owner_id: i64, id: i64) -> Result<Option<ContentItem>, error::SortKeyError> {
    let broker = DbBroker::new(store);
    broker.with_read(&store.library_db_path(), |conn| fetch_live(conn, owner_id, id))
}

/// Soft-delete `id` and, when it is a folder, every item beneath it.
/// Returns the number of rows marked deleted.
pub fn delete_content(store: &Store, owner_id: i64, id: i64) -> Result<usize, error::SortKeyError> {
    let broker = DbBroker::new(store);
    let db_path = store.library_db_path();

    broker.with_tx(&db_path, None, "library.delete", |conn| {
        let item = fetch_live(conn, owner_id, id)?.ok_or_else(|| {
            error::SortKeyError::NotFound(format!("content {} of owner {}", id, owner_id))
        })?;
        if !item.is_folder {
            return Ok(conn.execute("UPDATE content SET is_deleted = 1 WHERE id = ?1", params![id])?);
        }
        Ok(conn.execute(
            "WITH RECURSIVE subtree(id) AS (
                SELECT ?1
                UNION ALL
                SELECT c.id FROM content AS c INNER JOIN subtree AS s ON c.parent_folder_id = s.id
            )
            UPDATE content SET is_deleted = 1
            WHERE id IN (SELECT id FROM subtree) AND is_deleted = 0",
            params![id],
        )?)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "content",
        "version": "0.1.0",
        "description": "Folder contents ordered per owner and parent folder",
        "commands": [
            { "name": "create-folder", "parameters": ["owner", "parent", "name"] },
            { "name": "create-activity", "parameters": ["owner", "parent", "name"] },
            { "name": "move", "parameters": ["owner", "id", "parent", "position"] },
            { "name": "list", "parameters": ["owner", "parent"] },
            { "name": "delete", "parameters": ["owner", "id"] }
        ],
        "storage": ["library.db"]
    })
}

pub fn run_content_cli(store: &Store, cli: ContentCli) -> Result<serde_json::Value, error::SortKeyError> {
    let out = match cli.command {
        ContentCommand::CreateFolder { owner, parent, name } => {
            let item = create_folder(store, owner, parent, name.as_deref())?;
            time::command_envelope("content.create-folder", "ok", serde_json::json!({ "item": item }))
        }
        ContentCommand::CreateActivity { owner, parent, name } => {
            let item = create_activity(store, owner, parent, name.as_deref())?;
            time::command_envelope("content.create-activity", "ok", serde_json::json!({ "item": item }))
        }
        ContentCommand::Move {
            owner,
            id,
            parent,
            position: raw,
        } => {
            let desired = position::parse_desired_position(&raw)?;
            let outcome = move_content(store, owner, id, parent, desired)?;
            time::command_envelope("content.move", "ok", serde_json::json!({ "moved": outcome }))
        }
        ContentCommand::List { owner, parent } => {
            let items = list_folder(store, owner, parent)?;
            time::command_envelope(
                "content.list",
                "ok",
                serde_json::json!({ "owner": owner, "parent": parent, "items": items }),
            )
        }
        ContentCommand::Delete { owner, id } => {
            let rows = delete_content(store, owner, id)?;
            time::command_envelope("content.delete", "ok", serde_json::json!({ "id": id, "deleted_rows": rows }))
        }
    };
    Ok(out)
}
