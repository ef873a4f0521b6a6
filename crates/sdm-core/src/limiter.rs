//! Token-bucket bandwidth limiting.
//!
//! Two scopes exist: one global bucket shared by every active download and an
//! optional per-task bucket; a transfer consumes from both in sequence. A
//! disabled side is pass-through, and a fully disabled chain is a no-op.
//!
//! The bucket state sits behind a mutex held only for O(1) accounting; waits
//! happen outside the lock in bounded slices so a cancel token is observed at
//! limiter wake-up.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::control::CancelToken;
use crate::retry::DownloadError;

/// Upper bound on one sleep slice, keeping cancellation latency bounded.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    /// Refill rate in bytes per second.
    rate: f64,
    /// Burst capacity in bytes; tokens never exceed this.
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }
}

/// Thread-safe token bucket. Buckets start full.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<Bucket>,
}

impl TokenBucket {
    /// Bucket with burst capacity of one second of the refill rate.
    pub fn new(rate_bps: u64) -> Self {
        Self::with_burst(rate_bps, rate_bps)
    }

    pub fn with_burst(rate_bps: u64, burst_bytes: u64) -> Self {
        let rate = (rate_bps.max(1)) as f64;
        let burst = (burst_bytes.max(1)) as f64;
        Self {
            state: Mutex::new(Bucket {
                rate,
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Subtract `n` tokens if available, else return the minimum wait until
    /// they could be. Never blocks.
    pub fn try_consume(&self, n: u64) -> Option<Duration> {
        let mut b = self.state.lock().unwrap();
        b.refill(Instant::now());
        let n = n as f64;
        if b.tokens >= n {
            b.tokens -= n;
            None
        } else {
            let deficit = n - b.tokens;
            Some(Duration::from_secs_f64(deficit / b.rate))
        }
    }

    /// Consume `n` tokens, sleeping as needed. Returns early with a cancelled
    /// error when the token fires during a wait.
    pub fn consume(&self, n: u64, cancel: &CancelToken) -> Result<(), DownloadError> {
        loop {
            match self.try_consume(n) {
                None => return Ok(()),
                Some(wait) => {
                    if cancel.is_cancelled() {
                        return Err(DownloadError::cancelled());
                    }
                    std::thread::sleep(wait.min(MAX_WAIT_SLICE));
                }
            }
        }
    }

    /// Replace the refill rate (and matching one-second burst). Takes effect on
    /// the next consume; in-progress waits pick it up on their next iteration.
    pub fn set_rate(&self, rate_bps: u64) {
        let mut b = self.state.lock().unwrap();
        b.refill(Instant::now());
        b.rate = (rate_bps.max(1)) as f64;
        b.burst = b.rate;
        b.tokens = b.tokens.min(b.burst);
    }

    pub fn rate_bps(&self) -> u64 {
        self.state.lock().unwrap().rate as u64
    }
}

/// Global + per-task limiter pair passed down to segment workers.
/// `None` on either side means that scope is unlimited.
#[derive(Clone, Default)]
pub struct LimiterChain {
    global: Option<Arc<TokenBucket>>,
    per_task: Option<Arc<TokenBucket>>,
}

impl LimiterChain {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Build from configured rates; a rate of 0 means unlimited on that side.
    pub fn new(global_bps: u64, per_task_bps: u64) -> Self {
        Self {
            global: (global_bps > 0).then(|| Arc::new(TokenBucket::new(global_bps))),
            per_task: (per_task_bps > 0).then(|| Arc::new(TokenBucket::new(per_task_bps))),
        }
    }

    /// Chain sharing an existing global bucket, with an optional task-local one.
    pub fn with_global(global: Option<Arc<TokenBucket>>, per_task_bps: u64) -> Self {
        Self {
            global,
            per_task: (per_task_bps > 0).then(|| Arc::new(TokenBucket::new(per_task_bps))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.global.is_some() || self.per_task.is_some()
    }

    /// Chain for one download: the global bucket is shared, the per-task
    /// bucket (if configured) is fresh so concurrent tasks do not contend on
    /// each other's task-scope budget.
    pub fn per_download(&self) -> Self {
        Self {
            global: self.global.clone(),
            per_task: self
                .per_task
                .as_ref()
                .map(|b| Arc::new(TokenBucket::new(b.rate_bps()))),
        }
    }

    /// Pass both scopes in sequence. No-op when neither is enabled.
    pub fn consume(&self, n: u64, cancel: &CancelToken) -> Result<(), DownloadError> {
        if let Some(global) = &self.global {
            global.consume(n, cancel)?;
        }
        if let Some(per_task) = &self.per_task {
            per_task.consume(n, cancel)?;
        }
        Ok(())
    }
}
