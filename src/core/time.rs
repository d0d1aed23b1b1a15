//! Timestamps, event ids and the JSON envelope printed by every command.

use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Unix-epoch seconds with a `Z` suffix, e.g. `1771220592Z`.
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Wrap a command result: `{ ts, event_id, cmd, status, ...extra }`.
///
/// Envelope keys are never overwritten by `extra`. A non-object `extra` is
/// stored under `result`.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut out = serde_json::Map::new();
    out.insert("ts".into(), JsonValue::String(now_epoch_z()));
    out.insert("event_id".into(), JsonValue::String(new_event_id()));
    out.insert("cmd".into(), JsonValue::String(cmd.to_string()));
    out.insert("status".into(), JsonValue::String(status.to_string()));
    match extra {
        JsonValue::Object(map) => {
            for (k, v) in map {
                out.entry(k).or_insert(v);
            }
        }
        JsonValue::Null => {}
        other => {
            out.insert("result".into(), other);
        }
    }
    JsonValue::Object(out)
}
