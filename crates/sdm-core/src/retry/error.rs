//! Download error type with a retry-classification kind.

use std::fmt;
use std::time::Duration;

/// High-level classification of a download failure.
///
/// Kinds map one-to-one onto the wire/disk failure classes the scheduler
/// distinguishes; `is_retryable` encodes which of them are transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// DNS, TCP, TLS handshake, connection reset.
    Network,
    /// Connect or read timed out.
    Timeout,
    /// HTTP 5xx response.
    Http5xx,
    /// HTTP 429 Too Many Requests.
    Http429,
    /// HTTP 408 Request Timeout.
    Http408,
    /// Any other 4xx response.
    Http4xxOther,
    /// Unexpected status line, headers, or body framing (including a 200
    /// answered to a ranged request mid-plan, and TLS verification failures).
    Protocol,
    /// The prober could determine neither size nor range support.
    Unsupported,
    /// Local write failed transiently.
    IoWrite,
    /// Local write failed with no space on device.
    DiskFull,
    /// Computed digest differs from the expected digest. Never retried.
    ChecksumMismatch,
    /// Stopped by a cancel token.
    Cancelled,
    /// A structural contract was violated (e.g. malformed progress shape).
    ContractViolation,
    /// Bad configuration or snapshot.
    Validation,
}

impl ErrorKind {
    /// Transient failures the scheduler may retry. Everything else is terminal;
    /// a checksum mismatch in particular signals corruption or an unstable
    /// resource and needs human attention.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::Http5xx
                | ErrorKind::Http429
                | ErrorKind::Http408
                | ErrorKind::IoWrite
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Http5xx => "HTTP_5XX",
            ErrorKind::Http429 => "HTTP_429",
            ErrorKind::Http408 => "HTTP_408",
            ErrorKind::Http4xxOther => "HTTP_4XX_OTHER",
            ErrorKind::Protocol => "PROTOCOL",
            ErrorKind::Unsupported => "UNSUPPORTED",
            ErrorKind::IoWrite => "IO_WRITE",
            ErrorKind::DiskFull => "DISK_FULL",
            ErrorKind::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::ContractViolation => "CONTRACT_VIOLATION",
            ErrorKind::Validation => "VALIDATION",
        }
    }
}

/// Error returned by the prober, segment downloader, and coordinator.
/// Carries the classification kind plus an optional server-provided
/// `Retry-After` hint captured from 429/503/408 responses.
#[derive(Debug, Clone)]
pub struct DownloadError {
    kind: ErrorKind,
    message: String,
    retry_after: Option<Duration>,
}

impl DownloadError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled")
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for DownloadError {}
