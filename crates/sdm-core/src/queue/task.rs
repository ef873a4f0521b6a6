//! Task model and state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{ascii_sanitize, TaskSnapshot};
use crate::host::normalize_host;

/// Highest priority a task can reach, by request or by aging.
pub const MAX_PRIORITY: u8 = 10;

/// Task lifecycle states. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Starting,
    Downloading,
    Paused,
    RetryWait,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Starting => "STARTING",
            TaskState::Downloading => "DOWNLOADING",
            TaskState::Paused => "PAUSED",
            TaskState::RetryWait => "RETRY_WAIT",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// The only permitted edges of the task state machine.
    pub fn can_transition(from: TaskState, to: TaskState) -> bool {
        use TaskState::*;
        match (from, to) {
            (Pending, Starting) => true,
            (Starting, Downloading) => true,
            (Downloading, Completed) => true,
            (Downloading, Failed) => true,
            (Downloading, RetryWait) => true,
            (RetryWait, Pending) => true,
            (Pending | Starting | Downloading | RetryWait, Paused) => true,
            (Paused, Pending) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One queued download. Owned exclusively by the queue; executors see clones
/// and report back through the observer and the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub task_id: String,
    pub url: String,
    pub destination: String,
    pub priority: u8,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic enqueue order; deterministic FIFO tiebreak for equal
    /// priorities created in the same instant.
    pub seq: u64,
    #[serde(default)]
    pub bytes_downloaded: u64,
    #[serde(default)]
    pub bytes_total: u64,
    #[serde(default)]
    pub throughput_bps: f64,
    #[serde(default)]
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub next_eligible_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    pub effective_priority: u8,
    /// Opaque options handed through to the handler (e.g. an expected digest).
    #[serde(default)]
    pub type_options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resume_state_path: Option<String>,
}

impl QueueTask {
    pub fn new(
        task_id: &str,
        url: &str,
        destination: &str,
        priority: u8,
        max_attempts: u32,
        seq: u64,
        type_options: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            url: url.to_string(),
            destination: destination.to_string(),
            priority,
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
            seq,
            bytes_downloaded: 0,
            bytes_total: 0,
            throughput_bps: 0.0,
            attempt: 0,
            max_attempts,
            next_eligible_at: None,
            last_error: None,
            host: normalize_host(url),
            effective_priority: priority,
            type_options,
            resume_state_path: None,
        }
    }

    /// Apply a permitted transition, stamping `updated_at` and logging the
    /// edge. Returns false (and changes nothing) for a forbidden edge.
    pub fn transition_to(&mut self, to: TaskState) -> bool {
        if !TaskState::can_transition(self.state, to) {
            tracing::warn!(
                "TASK {} | INVALID TRANSITION | {} -> {}",
                self.task_id,
                self.state.as_str(),
                to.as_str()
            );
            return false;
        }
        tracing::info!(
            "TASK {} | {} -> {}",
            self.task_id,
            self.state.as_str(),
            to.as_str()
        );
        self.state = to;
        self.updated_at = Utc::now();
        true
    }

    /// Validated snapshot for event emission. String fields are sanitized to
    /// ASCII here so the serialized form is always ASCII-safe.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: ascii_sanitize(&self.task_id),
            state: self.state.as_str().to_string(),
            priority: self.priority,
            effective_priority: self.effective_priority,
            host: ascii_sanitize(self.host.as_deref().unwrap_or("")),
            bytes_downloaded: self.bytes_downloaded,
            bytes_total: self.bytes_total,
            throughput_bps: if self.throughput_bps.is_finite() {
                self.throughput_bps.max(0.0)
            } else {
                0.0
            },
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            next_eligible_at: self
                .next_eligible_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            last_error: ascii_sanitize(self.last_error.as_deref().unwrap_or("")),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            updated_at: self.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
