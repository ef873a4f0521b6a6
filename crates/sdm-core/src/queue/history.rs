//! Terminal-transition ledger.
//!
//! One entry per task, appended exactly when the task reaches a terminal
//! state. Durable form is JSON Lines (one snapshot per line) with unbounded
//! retention; an in-memory mirror serves queries.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::events::TaskSnapshot;

#[derive(Debug, Default)]
pub struct HistoryLedger {
    path: Option<PathBuf>,
    entries: Vec<TaskSnapshot>,
    recorded: HashSet<String>,
}

impl HistoryLedger {
    /// In-memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that also appends each entry to a JSONL file.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }

    /// Record a terminal snapshot. A task id already in the ledger is
    /// ignored: terminal means final.
    pub fn record(&mut self, snapshot: TaskSnapshot) {
        if !self.recorded.insert(snapshot.task_id.clone()) {
            tracing::warn!("task {} already in history ledger", snapshot.task_id);
            return;
        }
        if let Some(path) = &self.path {
            if let Err(e) = append_line(path, &snapshot) {
                tracing::warn!("history append failed for {}: {e}", path.display());
            }
        }
        self.entries.push(snapshot);
    }

    /// Seed an entry restored from persisted queue state (no re-append).
    pub fn restore(&mut self, snapshot: TaskSnapshot) {
        if self.recorded.insert(snapshot.task_id.clone()) {
            self.entries.push(snapshot);
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.recorded.contains(task_id)
    }

    pub fn entries(&self) -> &[TaskSnapshot] {
        &self.entries
    }
}

fn append_line(path: &PathBuf, snapshot: &TaskSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(snapshot)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(f, "{line}")
}
