//! Fractional position keys for user-ordered scopes.
//!
//! Items inside a scope (an owner's folder, a promoted group, the list of
//! promoted groups) carry an `i64` sort index. Only the relative order of the
//! indices matters. New items are appended `SORT_INCREMENT` past the current
//! maximum, and a reorder normally picks the midpoint between the two new
//! neighbours, so a move touches a single row.
//!
//! When two neighbours are consecutive integers there is no room left. The
//! allocator then asks its caller to shift one side of the scope by
//! `SORT_INCREMENT` through a [`Shift`] request and computes the key against
//! the shifted layout. The allocator never touches storage itself.
//!
//! # Keyspace ceiling
//!
//! Keys live in `i64`. Starting from zero, roughly `2^31` consecutive appends
//! (or prepends) fit before the keyspace is exhausted, at which point
//! [`SortKeyError::KeyspaceExhausted`] is returned instead of wrapping.

use crate::core::error::SortKeyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spacing between appended keys and the amount applied by a shift.
pub const SORT_INCREMENT: i64 = 1 << 32;

/// Which way a shift moves the affected keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    Increment(i64),
    Decrement(i64),
}

impl ShiftDirection {
    /// Signed amount added to every affected key.
    pub fn delta(&self) -> i64 {
        match *self {
            ShiftDirection::Increment(n) => n,
            ShiftDirection::Decrement(n) => -n,
        }
    }
}

/// The keys a shift applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRange {
    /// Keys `>=` the bound.
    AtLeast(i64),
    /// Keys `<=` the bound.
    AtMost(i64),
}

impl KeyRange {
    pub fn contains(&self, key: i64) -> bool {
        match *self {
            KeyRange::AtLeast(bound) => key >= bound,
            KeyRange::AtMost(bound) => key <= bound,
        }
    }

    pub fn bound(&self) -> i64 {
        match *self {
            KeyRange::AtLeast(bound) | KeyRange::AtMost(bound) => bound,
        }
    }

    /// SQL comparison operator matching this range, for `sort_index <op> ?`.
    pub fn sql_operator(&self) -> &'static str {
        match self {
            KeyRange::AtLeast(_) => ">=",
            KeyRange::AtMost(_) => "<=",
        }
    }
}

/// A re-spacing request handed to the caller's shift callback.
///
/// The callback must durably add `direction.delta()` to every key of the
/// scope that falls in `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub direction: ShiftDirection,
    pub range: KeyRange,
}

impl Shift {
    /// The key after this shift. Keys outside `range` are returned unchanged.
    pub fn apply(&self, key: i64) -> i64 {
        if self.range.contains(key) {
            key + self.direction.delta()
        } else {
            key
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sign, amount) = match self.direction {
            ShiftDirection::Increment(n) => ('+', n),
            ShiftDirection::Decrement(n) => ('-', n),
        };
        write!(
            f,
            "{}{} where sort_index {} {}",
            sign,
            amount,
            self.range.sql_operator(),
            self.range.bound()
        )
    }
}

fn exhausted(what: &str) -> SortKeyError {
    SortKeyError::KeyspaceExhausted(format!("{} leaves the i64 key range", what))
}

fn to_key(value: i128, what: &str) -> Result<i64, SortKeyError> {
    i64::try_from(value).map_err(|_| exhausted(what))
}

/// `round(sum / 2)` with halves rounded toward positive infinity.
fn half_rounded(sum: i128) -> i128 {
    (sum + 1).div_euclid(2)
}

/// Compute the sort index that places an item at `desired_position`.
///
/// `current_keys` are the scope's keys in ascending order, excluding the item
/// being placed. `desired_position` is the zero-based index the item should
/// end up at; values `<= 0` mean "first" and values `>= current_keys.len()`
/// mean "last".
///
/// If the neighbours at `desired_position` are adjacent integers, `shift` is
/// called exactly once to re-space whichever side of the insertion point is
/// presumed smaller, and the returned key accounts for that shift. `shift` is
/// not called otherwise. An error from `shift` is returned as-is.
pub fn allocate<F>(
    current_keys: &[i64],
    desired_position: i64,
    shift: F,
) -> Result<i64, SortKeyError>
where
    F: FnOnce(Shift) -> Result<(), SortKeyError>,
{
    let (first, last) = match (current_keys.first(), current_keys.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(0),
    };
    let len = current_keys.len() as i64;

    if desired_position <= 0 {
        return first
            .checked_sub(SORT_INCREMENT)
            .ok_or_else(|| exhausted("prepend"));
    }
    if desired_position >= len {
        return last
            .checked_add(SORT_INCREMENT)
            .ok_or_else(|| exhausted("append"));
    }

    // 0 < desired_position < len, so both neighbours exist.
    let idx = desired_position as usize;
    let preceding = current_keys[idx - 1] as i128;
    let following = current_keys[idx] as i128;
    let increment = SORT_INCREMENT as i128;

    let candidate = half_rounded(preceding + following);
    if preceding < candidate && candidate < following {
        return to_key(candidate, "midpoint");
    }

    // No integer fits between the neighbours. Shift the side presumed smaller.
    let (request, key) = if 2 * desired_position >= len {
        to_key(last as i128 + increment, "shift toward the end")?;
        (
            Shift {
                direction: ShiftDirection::Increment(SORT_INCREMENT),
                range: KeyRange::AtLeast(following as i64),
            },
            half_rounded(preceding + following + increment),
        )
    } else {
        to_key(first as i128 - increment, "shift toward the start")?;
        (
            Shift {
                direction: ShiftDirection::Decrement(SORT_INCREMENT),
                range: KeyRange::AtMost(preceding as i64),
            },
            half_rounded(preceding - increment + following),
        )
    };
    let key = to_key(key, "re-spaced midpoint")?;

    shift(request)?;
    Ok(key)
}

/// Sort index for a new item appended after `last` (the scope's current
/// maximum, `None` for an empty scope).
///
/// The result is the smallest multiple of `SORT_INCREMENT` that is at least
/// `SORT_INCREMENT` past `last`, which keeps appended keys aligned even after
/// midpoint inserts near the end. An empty scope starts at 0.
pub fn next_sort_index(last: Option<i64>) -> Result<i64, SortKeyError> {
    let Some(last) = last else {
        return Ok(0);
    };
    let last = last as i128;
    let increment = SORT_INCREMENT as i128;
    let mut steps = last.div_euclid(increment);
    if last.rem_euclid(increment) != 0 {
        steps += 1;
    }
    to_key((steps + 1) * increment, "append")
}

/// Parse a caller-supplied target index.
///
/// Integral values are accepted, including ones written as `3.0`; anything
/// else is a caller error and is rejected before any work is done. Integers
/// beyond the `i64` range saturate, which the allocator treats as first/last.
pub fn parse_desired_position(raw: &str) -> Result<i64, SortKeyError> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(n);
    }
    match trimmed.parse::<f64>() {
        // `as` saturates, so integral values past the i64 range clamp to the ends.
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(SortKeyError::ValidationError(format!(
            "desired position must be an integer, got '{}'",
            raw
        ))),
    }
}
