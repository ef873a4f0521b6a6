//! Exponential backoff policy with jitter and Retry-After support.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::DownloadError;

/// Maximum Retry-After we will honor, to keep a hostile header from parking a
/// task for hours.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// How backoff delays are jittered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    /// Use the computed delay as-is.
    None,
    /// Uniform in [0, delay].
    Full,
    /// Uniform multiplier in [0.5, 1.5].
    #[default]
    Proportional,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; the task fails terminally.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a cap: `min(base * 2^(attempt-1), max)`, jittered.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per task, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: JitterMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter: JitterMode::Proportional,
        }
    }
}

impl RetryPolicy {
    /// Raw capped exponential delay for a 1-based attempt count, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        match self.jitter {
            JitterMode::None => delay,
            JitterMode::Full => delay.mul_f64(rng.gen_range(0.0..=1.0)),
            JitterMode::Proportional => delay.mul_f64(rng.gen_range(0.5..=1.5)),
        }
    }

    /// Decide whether to retry after a failure on the given attempt (1-based,
    /// counting tries performed so far). A server Retry-After hint is honored
    /// when it is larger than the computed backoff.
    pub fn decide(&self, attempt: u32, error: &DownloadError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let mut delay = self.jittered(self.backoff_delay(attempt));
        if let Some(hint) = error.retry_after() {
            let hint = hint.min(MAX_RETRY_AFTER);
            if hint > delay {
                delay = hint;
            }
        }
        RetryDecision::RetryAfter(delay)
    }
}

/// Parse a Retry-After header value: integer seconds or an HTTP-date.
/// Values are capped at one hour; unparseable input yields `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds as u64).min(MAX_RETRY_AFTER));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    match when.duration_since(std::time::SystemTime::now()) {
        Ok(d) => Some(d.min(MAX_RETRY_AFTER)),
        // A date in the past means "now".
        Err(_) => Some(Duration::ZERO),
    }
}
