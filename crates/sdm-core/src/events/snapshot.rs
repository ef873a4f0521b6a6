//! Validated snapshot shapes published to external consumers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::retry::{DownloadError, ErrorKind};

/// Keys every task snapshot must carry.
pub const REQUIRED_SNAPSHOT_KEYS: [&str; 14] = [
    "task_id",
    "state",
    "priority",
    "effective_priority",
    "host",
    "bytes_downloaded",
    "bytes_total",
    "throughput_bps",
    "attempt",
    "max_attempts",
    "next_eligible_at",
    "last_error",
    "created_at",
    "updated_at",
];

const VALID_STATES: [&str; 8] = [
    "PENDING",
    "STARTING",
    "DOWNLOADING",
    "PAUSED",
    "RETRY_WAIT",
    "COMPLETED",
    "FAILED",
    "CANCELLED",
];

/// Immutable view of one task, safe to hand to external consumers.
/// String fields are ASCII-sanitized at build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub state: String,
    pub priority: u8,
    pub effective_priority: u8,
    /// Normalized hostname; empty when the URL has none.
    pub host: String,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
    pub throughput_bps: f64,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_eligible_at: Option<String>,
    /// Empty when the task has not failed.
    pub last_error: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskSnapshot {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Replace every non-ASCII character so serialized snapshots stay ASCII-safe.
pub fn ascii_sanitize(s: &str) -> String {
    if s.is_ascii() {
        s.to_string()
    } else {
        s.chars()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect()
    }
}

fn expect_string(v: &serde_json::Value, key: &str) -> Result<(), DownloadError> {
    match v.get(key).and_then(|x| x.as_str()) {
        Some(s) if s.is_ascii() => Ok(()),
        Some(_) => Err(invalid(key, "non-ascii string")),
        None => Err(invalid(key, "expected string")),
    }
}

fn expect_uint(v: &serde_json::Value, key: &str) -> Result<u64, DownloadError> {
    v.get(key)
        .and_then(|x| x.as_u64())
        .ok_or_else(|| invalid(key, "expected unsigned integer"))
}

fn invalid(key: &str, reason: &str) -> DownloadError {
    DownloadError::new(
        ErrorKind::Validation,
        format!("snapshot field {key}: {reason}"),
    )
}

/// Check a task snapshot for the presence and semantic type of every
/// required key. Invalid snapshots are rejected before emission.
pub fn validate_snapshot(value: &serde_json::Value) -> Result<(), DownloadError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("snapshot", "expected object"))?;
    for key in REQUIRED_SNAPSHOT_KEYS {
        if !obj.contains_key(key) {
            return Err(invalid(key, "missing"));
        }
    }

    expect_string(value, "task_id")?;
    expect_string(value, "state")?;
    let state = value["state"].as_str().unwrap_or_default();
    if !VALID_STATES.contains(&state) {
        return Err(invalid("state", "not a known task state"));
    }
    let priority = expect_uint(value, "priority")?;
    let effective = expect_uint(value, "effective_priority")?;
    if !(1..=10).contains(&priority) || !(1..=10).contains(&effective) {
        return Err(invalid("priority", "outside 1-10"));
    }
    expect_string(value, "host")?;
    expect_uint(value, "bytes_downloaded")?;
    expect_uint(value, "bytes_total")?;
    match value.get("throughput_bps").and_then(|x| x.as_f64()) {
        Some(t) if t.is_finite() && t >= 0.0 => {}
        _ => return Err(invalid("throughput_bps", "expected non-negative number")),
    }
    expect_uint(value, "attempt")?;
    expect_uint(value, "max_attempts")?;
    match value.get("next_eligible_at") {
        Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::String(s)) if s.is_ascii() => {}
        _ => return Err(invalid("next_eligible_at", "expected string or null")),
    }
    expect_string(value, "last_error")?;
    expect_string(value, "created_at")?;
    expect_string(value, "updated_at")?;
    Ok(())
}

/// Aggregate queue view published on `QUEUE_STATUS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusSnapshot {
    pub total_tasks: usize,
    pub state_counts: BTreeMap<String, usize>,
    pub active_count: usize,
    pub max_active: usize,
    pub scheduler_running: bool,
}

impl QueueStatusSnapshot {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
