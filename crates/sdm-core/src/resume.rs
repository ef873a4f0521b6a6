//! Per-download resume state, stored alongside the destination.
//!
//! One record per destination at `<final>.resume`, written atomically. The
//! segment table must partition `[0, total_size-1]` exactly; a record that
//! fails validation (or no longer matches the remote resource) is discarded
//! and the download restarts clean. Exactly one coordinator owns the record
//! for a destination at a time.

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::probe::ProbeResult;
use crate::retry::{DownloadError, ErrorKind};
use crate::segmenter::{partition_is_exact, Segment};
use crate::storage;

pub const RESUME_SCHEMA_VERSION: u32 = 1;

/// Progress of one planned segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentRecord {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub bytes_written: u64,
}

/// Durable snapshot of a multi-mode download plan and its progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub version: u32,
    pub url: String,
    pub total_size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub segments: Vec<SegmentRecord>,
    pub created_at: String,
}

impl ResumeRecord {
    /// Fresh record for a new plan, before any byte is written.
    pub fn new(url: &str, total_size: u64, probed: &ProbeResult, segments: &[Segment]) -> Self {
        Self::with_progress(url, total_size, probed, segments, &vec![0; segments.len()])
    }

    /// Record carrying current per-segment byte counts.
    pub fn with_progress(
        url: &str,
        total_size: u64,
        probed: &ProbeResult,
        segments: &[Segment],
        bytes: &[u64],
    ) -> Self {
        Self {
            version: RESUME_SCHEMA_VERSION,
            url: url.to_string(),
            total_size,
            etag: probed.etag.clone(),
            last_modified: probed.last_modified.clone(),
            segments: segments
                .iter()
                .map(|s| SegmentRecord {
                    index: s.index,
                    start: s.start,
                    end: s.end,
                    bytes_written: bytes.get(s.index).copied().unwrap_or(0).min(s.len()),
                })
                .collect(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// The plan this record describes.
    pub fn plan(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .map(|r| Segment {
                index: r.index,
                start: r.start,
                end: r.end,
            })
            .collect()
    }

    /// Schema and partition sanity. Rejects unknown versions, empty tables,
    /// and any table that does not cover `[0, total_size-1]` exactly.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.version != RESUME_SCHEMA_VERSION {
            return Err(DownloadError::new(
                ErrorKind::Validation,
                format!("unknown resume schema version {}", self.version),
            ));
        }
        if self.total_size == 0 || self.segments.is_empty() {
            return Err(DownloadError::new(
                ErrorKind::Validation,
                "resume record without a segment table",
            ));
        }
        if !partition_is_exact(&self.plan(), self.total_size) {
            return Err(DownloadError::new(
                ErrorKind::Validation,
                "resume segment table does not partition the byte range",
            ));
        }
        for r in &self.segments {
            if r.bytes_written > r.end - r.start + 1 {
                return Err(DownloadError::new(
                    ErrorKind::Validation,
                    format!("segment {} byte count exceeds its range", r.index),
                ));
            }
        }
        Ok(())
    }

    /// Whether the remote resource still matches this record: same URL and
    /// size, and no validator changed. A validator present on only one side
    /// counts as changed.
    pub fn matches_remote(&self, url: &str, total_size: u64, probed: &ProbeResult) -> bool {
        if self.url != url || self.total_size != total_size {
            return false;
        }
        let etag_changed = match (&self.etag, &probed.etag) {
            (None, None) => false,
            (Some(a), Some(b)) => a != b,
            _ => true,
        };
        let last_modified_changed = match (&self.last_modified, &probed.last_modified) {
            (None, None) => false,
            (Some(a), Some(b)) => a != b,
            _ => true,
        };
        !(etag_changed || last_modified_changed)
    }
}

/// Atomically persist the record to `<final>.resume`.
pub fn save(destination: &Path, record: &ResumeRecord) -> Result<(), DownloadError> {
    record.validate()?;
    let path = storage::resume_path(destination);
    storage::write_json_atomic(&path, record)
        .map_err(|e| DownloadError::new(ErrorKind::IoWrite, format!("save resume state: {e:#}")))?;
    let bytes: u64 = record.segments.iter().map(|s| s.bytes_written).sum();
    tracing::info!("RESUME | STATE_SAVED | path={} | bytes={bytes}", path.display());
    Ok(())
}

/// Load the record for a destination. Corrupt or invalid records are
/// discarded (and logged), never fatal.
pub fn load(destination: &Path) -> Option<ResumeRecord> {
    let path = storage::resume_path(destination);
    let data = fs::read(&path).ok()?;
    let record: ResumeRecord = match serde_json::from_slice(&data) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("discarding corrupt resume record {}: {e}", path.display());
            let _ = fs::remove_file(&path);
            return None;
        }
    };
    if let Err(e) = record.validate() {
        tracing::warn!("discarding invalid resume record {}: {e}", path.display());
        let _ = fs::remove_file(&path);
        return None;
    }
    Some(record)
}

/// Remove the record for a destination, if any.
pub fn delete(destination: &Path) {
    let path = storage::resume_path(destination);
    if path.exists() {
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("failed to remove resume record {}: {e}", path.display());
        } else {
            tracing::info!("RESUME | CLEANUP | path={}", path.display());
        }
    }
}
