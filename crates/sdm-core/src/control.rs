//! Cooperative cancellation: shared cancel tokens and a per-task registry.
//!
//! Each dispatched task is registered with a cancel token. Pause and cancel
//! requests set the token; segment workers check it between chunks and at
//! limiter wake-up, so cancellation is observed within the chunk cadence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Shared cancellation signal. Cheap to clone; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registry of task id -> cancel token for everything currently dispatched.
/// The scheduler registers a token when it starts a task; pause/cancel look the
/// token up and set it.
#[derive(Debug, Default)]
pub struct TaskControl {
    tokens: RwLock<HashMap<String, CancelToken>>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task; returns the token to pass into the download.
    pub fn register(&self, task_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .write()
            .unwrap()
            .insert(task_id.to_string(), token.clone());
        token
    }

    /// Unregister a task (call when its worker finishes, success or failure).
    pub fn unregister(&self, task_id: &str) {
        self.tokens.write().unwrap().remove(task_id);
    }

    /// Signal cancellation for a task if it is currently registered.
    /// Returns true when a token was found.
    pub fn request_cancel(&self, task_id: &str) -> bool {
        match self.tokens.read().unwrap().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn registry_cancels_registered_tasks_only() {
        let control = TaskControl::new();
        let token = control.register("t1");
        assert!(!control.request_cancel("missing"));
        assert!(control.request_cancel("t1"));
        assert!(token.is_cancelled());
        control.unregister("t1");
        assert!(!control.request_cancel("t1"));
    }
}
