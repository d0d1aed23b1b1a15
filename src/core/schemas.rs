//! Database schema definitions for the library store.
//!
//! Everything lives in one SQLite file, `library.db`:
//! 1. `content`: folders and activities, ordered per (owner, parent folder).
//! 2. `promoted_groups`: promoted-content groups, ordered globally.
//! 3. `promoted_content`: activities promoted into a group, ordered per group.
//!
//! Every ordered table carries an `INTEGER sort_index`. Uniqueness of keys
//! inside a scope is maintained by the allocator and the broker, not by a
//! constraint, because a shift rewrites many keys in one statement.

pub const LIBRARY_DB_NAME: &str = "library.db";

pub const LIBRARY_DB_SCHEMA_CONTENT: &str = "
    CREATE TABLE IF NOT EXISTS content (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        parent_folder_id INTEGER,
        is_folder INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        sort_index INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(parent_folder_id) REFERENCES content(id)
    )
";
pub const LIBRARY_DB_SCHEMA_CONTENT_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_content_scope ON content(owner_id, parent_folder_id, sort_index)";

pub const LIBRARY_DB_SCHEMA_PROMOTED_GROUPS: &str = "
    CREATE TABLE IF NOT EXISTS promoted_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_name TEXT NOT NULL UNIQUE,
        sort_index INTEGER NOT NULL,
        homepage INTEGER NOT NULL DEFAULT 0,
        currently_featured INTEGER NOT NULL DEFAULT 0
    )
";
pub const LIBRARY_DB_SCHEMA_PROMOTED_GROUPS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_promoted_groups_sort ON promoted_groups(sort_index)";

pub const LIBRARY_DB_SCHEMA_PROMOTED_CONTENT: &str = "
    CREATE TABLE IF NOT EXISTS promoted_content (
        group_id INTEGER NOT NULL,
        activity_id INTEGER NOT NULL,
        sort_index INTEGER NOT NULL,
        PRIMARY KEY(group_id, activity_id),
        FOREIGN KEY(group_id) REFERENCES promoted_groups(id),
        FOREIGN KEY(activity_id) REFERENCES content(id)
    )
";
pub const LIBRARY_DB_SCHEMA_PROMOTED_CONTENT_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_promoted_content_scope ON promoted_content(group_id, sort_index)";

/// All statements needed for a fresh library database, in dependency order.
pub const LIBRARY_DB_SCHEMA: &[&str] = &[
    LIBRARY_DB_SCHEMA_CONTENT,
    LIBRARY_DB_SCHEMA_CONTENT_INDEX,
    LIBRARY_DB_SCHEMA_PROMOTED_GROUPS,
    LIBRARY_DB_SCHEMA_PROMOTED_GROUPS_INDEX,
    LIBRARY_DB_SCHEMA_PROMOTED_CONTENT,
    LIBRARY_DB_SCHEMA_PROMOTED_CONTENT_INDEX,
];
