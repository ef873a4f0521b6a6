//! Durable queue state: schema v1, atomic saves, crash recovery on load.
//!
//! `{ version: 1, exported_at: iso8601, tasks: [...] }`. Saves are atomic
//! (sibling temp + rename). Loading rewrites interrupted work so a restart
//! never resurrects an in-flight state: STARTING and DOWNLOADING become
//! PAUSED; terminal tasks leave the active set and go to the history ledger.
//! An unknown schema version is refused outright.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::queue::{QueueTask, TaskState};
use crate::storage;

pub const QUEUE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct QueueStateFile {
    version: u32,
    exported_at: String,
    tasks: Vec<QueueTask>,
}

/// Result of loading persisted state, post crash-recovery.
#[derive(Debug, Default)]
pub struct LoadedQueue {
    /// Runnable tasks (never STARTING or DOWNLOADING).
    pub active: Vec<QueueTask>,
    /// Terminal tasks, for the history ledger only.
    pub terminal: Vec<QueueTask>,
}

/// Atomically write the queue state file.
pub fn save(path: &Path, tasks: &[QueueTask]) -> Result<()> {
    let state = QueueStateFile {
        version: QUEUE_SCHEMA_VERSION,
        exported_at: Utc::now().to_rfc3339(),
        tasks: tasks.to_vec(),
    };
    storage::write_json_atomic(path, &state)
        .with_context(|| format!("save queue state to {}", path.display()))?;
    tracing::info!(
        "QUEUEPERSIST | SAVE_OK | tasks={} | path={}",
        tasks.len(),
        path.display()
    );
    Ok(())
}

/// Load and rewrite persisted state. Fails loud on unreadable files and on
/// any schema version this build does not understand.
pub fn load(path: &Path) -> Result<LoadedQueue> {
    let data = fs::read(path).with_context(|| format!("read queue state {}", path.display()))?;
    let state: QueueStateFile = serde_json::from_slice(&data)
        .with_context(|| format!("parse queue state {}", path.display()))?;
    if state.version != QUEUE_SCHEMA_VERSION {
        bail!(
            "queue state {} has unsupported schema version {} (expected {})",
            path.display(),
            state.version,
            QUEUE_SCHEMA_VERSION
        );
    }

    let mut loaded = LoadedQueue::default();
    for mut task in state.tasks {
        let from = task.state;
        match from {
            TaskState::Starting | TaskState::Downloading => {
                // Interrupted mid-flight; the user must resume to continue.
                task.state = TaskState::Paused;
                task.updated_at = Utc::now();
                tracing::info!(
                    "RECOVERY | TASK | task_id={} | from={} -> PAUSED",
                    task.task_id,
                    from.as_str()
                );
                loaded.active.push(task);
            }
            TaskState::Pending | TaskState::Paused | TaskState::RetryWait => {
                loaded.active.push(task);
            }
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
                loaded.terminal.push(task);
            }
        }
    }
    tracing::info!(
        "QUEUEPERSIST | LOAD_OK | tasks={} | path={}",
        loaded.active.len() + loaded.terminal.len(),
        path.display()
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn task(id: &str, state: TaskState) -> QueueTask {
        let mut t = QueueTask::new(
            id,
            "http://example.com/f",
            "/tmp/f",
            5,
            3,
            0,
            BTreeMap::new(),
        );
        t.state = state;
        t
    }

    #[test]
    fn round_trip_applies_crash_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_state.json");
        let tasks = vec![
            task("pending", TaskState::Pending),
            task("starting", TaskState::Starting),
            task("downloading", TaskState::Downloading),
            task("paused", TaskState::Paused),
            task("retry", TaskState::RetryWait),
            task("done", TaskState::Completed),
            task("failed", TaskState::Failed),
            task("cancelled", TaskState::Cancelled),
        ];
        save(&path, &tasks).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.active.len(), 5);
        assert_eq!(loaded.terminal.len(), 3);
        let state_of = |id: &str| {
            loaded
                .active
                .iter()
                .find(|t| t.task_id == id)
                .map(|t| t.state)
        };
        assert_eq!(state_of("pending"), Some(TaskState::Pending));
        assert_eq!(state_of("starting"), Some(TaskState::Paused));
        assert_eq!(state_of("downloading"), Some(TaskState::Paused));
        assert_eq!(state_of("paused"), Some(TaskState::Paused));
        assert_eq!(state_of("retry"), Some(TaskState::RetryWait));
        // No in-flight state survives a restart.
        assert!(loaded
            .active
            .iter()
            .all(|t| !matches!(t.state, TaskState::Starting | TaskState::Downloading)));
    }

    #[test]
    fn repeated_round_trip_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_state.json");
        let tasks = vec![
            task("a", TaskState::Downloading),
            task("b", TaskState::Pending),
        ];
        save(&path, &tasks).unwrap();
        let first = load(&path).unwrap();

        save(&path, &first.active).unwrap();
        let second = load(&path).unwrap();
        assert_eq!(second.active.len(), first.active.len());
        for (x, y) in first.active.iter().zip(second.active.iter()) {
            assert_eq!(x.task_id, y.task_id);
            assert_eq!(x.state, y.state);
        }
    }

    #[test]
    fn unknown_schema_version_fails_loud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_state.json");
        fs::write(
            &path,
            serde_json::json!({"version": 2, "exported_at": "x", "tasks": []}).to_string(),
        )
        .unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn corrupt_file_fails_loud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue_state.json");
        fs::write(&path, b"{broken").unwrap();
        assert!(load(&path).is_err());
    }
}
