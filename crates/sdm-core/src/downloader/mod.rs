//! Download execution: range-segmented multi-connection transfers with a
//! single-stream fallback, merge-and-hash commit, and resume.
//!
//! The [`Coordinator`] plans segments from a probe result, runs one blocking
//! worker per segment through the shared limiter chain, aggregates progress
//! on a fixed cadence, and commits the merged file atomically.

mod coordinator;
mod merge;
mod progress;
mod segment;
mod single;

pub use coordinator::{
    Coordinator, CoordinatorConfig, DownloadInfo, DownloadMode, DownloadRequest,
};
pub use progress::{format_speed, ProgressFn, ProgressObserver, ProgressUpdate, TaskProgress};
