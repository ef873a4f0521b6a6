//! Thread-safe in-process pub/sub for task and queue events.
//!
//! Subscribers register a handler and get a token back for unsubscribing.
//! Emission snapshots the subscriber list outside the lock, so handlers may
//! subscribe or unsubscribe freely during delivery, and a panicking handler
//! is isolated from the other subscribers and from the emitter.

mod snapshot;
mod throttle;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use snapshot::{
    ascii_sanitize, validate_snapshot, QueueStatusSnapshot, TaskSnapshot, REQUIRED_SNAPSHOT_KEYS,
};
pub use throttle::ProgressThrottle;

/// Event topics published by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TaskAdded,
    TaskUpdated,
    QueueStatus,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::TaskAdded => "TASK_ADDED",
            Topic::TaskUpdated => "TASK_UPDATED",
            Topic::QueueStatus => "QUEUE_STATUS",
        }
    }
}

/// Handler invoked with the topic and a validated JSON payload.
pub type Handler = dyn Fn(Topic, &serde_json::Value) + Send + Sync;

/// Token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, Arc<Handler>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(Topic, &serde_json::Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .insert(id, Arc::new(handler));
        SubscriberId(id)
    }

    /// Returns true when the token was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().unwrap().remove(&id.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Deliver to every current subscriber. Handlers run outside the lock;
    /// one panicking handler does not affect the others or the emitter.
    pub fn emit(&self, topic: Topic, payload: &serde_json::Value) {
        let handlers: Vec<Arc<Handler>> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(topic, payload))).is_err() {
                tracing::warn!("event subscriber panicked on {}", topic.as_str());
            }
        }
    }
}
