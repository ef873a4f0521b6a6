//! Failure classification and retry policy.
//!
//! The segment downloader and prober return a [`DownloadError`] carrying an
//! [`ErrorKind`]; the coordinator propagates the first failure of a plan; the
//! scheduler consults [`RetryPolicy`] to choose between RETRY_WAIT and FAILED.

mod classify;
mod error;
mod policy;

pub use classify::{classify_curl_error, classify_http_status, classify_io_error};
pub use error::{DownloadError, ErrorKind};
pub use policy::{parse_retry_after, JitterMode, RetryDecision, RetryPolicy};
