//! Per-task throttle for progress events.
//!
//! Progress updates are coalesced to at most one per interval per task;
//! state transitions bypass this entirely and are always emitted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_emit: Mutex<HashMap<String, Instant>>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    /// True when enough time has passed since this task's last progress
    /// event; records the emission time when it is.
    pub fn should_emit(&self, task_id: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last_emit.lock().unwrap();
        match last.get(task_id) {
            Some(at) if now.duration_since(*at) < self.min_interval => false,
            _ => {
                last.insert(task_id.to_string(), now);
                true
            }
        }
    }

    /// Drop the task's throttle state (call when a task leaves the active set).
    pub fn forget(&self, task_id: &str) {
        self.last_emit.lock().unwrap().remove(task_id);
    }
}
