//! Binding between the pure allocator and a persisted scope.
//!
//! A plugin describes one ordered scope (which rows, which table) through
//! [`OrderedScope`]; [`place`] then reads the keys, runs the allocator and
//! routes any shift back into the same connection. Callers run `place` inside
//! a broker transaction so the whole read-shift-write sequence is atomic.

use crate::core::error::SortKeyError;
use crate::core::position::{self, Shift};
use rusqlite::Connection;
use serde::Serialize;

/// One ordered set of sibling rows.
pub trait OrderedScope {
    /// Sort indices of the scope, ascending, excluding the row being placed.
    fn current_keys(&self, conn: &Connection) -> Result<Vec<i64>, SortKeyError>;

    /// Apply `shift` to the same rows `current_keys` reads. Returns rows touched.
    fn apply_shift(&self, conn: &Connection, shift: Shift) -> Result<usize, SortKeyError>;

    /// Current maximum sort index of the scope, `None` when empty.
    fn max_key(&self, conn: &Connection) -> Result<Option<i64>, SortKeyError>;

    /// Short label for logs, e.g. `content(owner=1,parent=root)`.
    fn label(&self) -> String;
}

/// Where an item ended up and what had to move to make room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub sort_index: i64,
    pub shift: Option<Shift>,
    pub shifted_rows: usize,
}

pub fn place(
    conn: &Connection,
    scope: &dyn OrderedScope,
    desired_position: i64,
) -> Result<Placement, SortKeyError> {
    let keys = scope.current_keys(conn)?;
    let mut applied: Option<(Shift, usize)> = None;
    let sort_index = position::allocate(&keys, desired_position, |shift| {
        let rows = scope.apply_shift(conn, shift)?;
        applied = Some((shift, rows));
        Ok(())
    })?;

    let (shift, shifted_rows) = match applied {
        Some((shift, rows)) => (Some(shift), rows),
        None => (None, 0),
    };
    Ok(Placement {
        sort_index,
        shift,
        shifted_rows,
    })
}

/// Sort index that appends a new row to `scope`.
pub fn append_key(conn: &Connection, scope: &dyn OrderedScope) -> Result<i64, SortKeyError> {
    position::next_sort_index(scope.max_key(conn)?)
}

/// Audit detail for a placement that needed a shift.
pub fn shift_detail(scope: &dyn OrderedScope, placement: &Placement) -> Option<serde_json::Value> {
    placement.shift.map(|shift| {
        serde_json::json!({
            "scope": scope.label(),
            "shift": shift,
            "shift_text": shift.to_string(),
            "rows": placement.shifted_rows,
            "sort_index": placement.sort_index,
        })
    })
}
