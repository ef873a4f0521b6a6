//! Multi-connection coordination: mode selection, planning, concurrent
//! execution, merge, and atomic commit — with single-stream fallback.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::checksum;
use crate::control::CancelToken;
use crate::limiter::LimiterChain;
use crate::probe::{self, ProbeResult};
use crate::resume::{self, ResumeRecord};
use crate::retry::{DownloadError, ErrorKind};
use crate::segmenter::{plan_segments, Segment};
use crate::storage;

use super::merge;
use super::progress::{format_speed, ProgressFn, ProgressObserver, ProgressUpdate, TaskProgress};
use super::segment::{download_segment, SegmentStop};
use super::single::download_single_stream;

/// Tuning for one coordinator, derived from the engine configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Cap on segments per download (1-16).
    pub max_connections: usize,
    /// Minimum size before multi-mode is considered.
    pub multi_connection_threshold_bytes: u64,
    /// Lower bound on one segment.
    pub min_segment_size_bytes: u64,
    /// Per-read transfer granularity.
    pub chunk_size_bytes: usize,
    /// Remove multi-mode partials and the resume record on cancel.
    pub cleanup_on_cancel: bool,
    /// Task-level progress cadence.
    pub progress_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            multi_connection_threshold_bytes: 8 * 1024 * 1024,
            min_segment_size_bytes: 1024 * 1024,
            chunk_size_bytes: 64 * 1024,
            cleanup_on_cancel: false,
            progress_interval: Duration::from_millis(250),
        }
    }
}

/// One download order: source, destination, optional expected digest.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    Multi,
    Single,
}

impl DownloadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadMode::Multi => "multi",
            DownloadMode::Single => "single",
        }
    }
}

/// Outcome contract returned by [`Coordinator::download`]. The shape is
/// invariant: `sha256` is present exactly when `error` is absent.
#[derive(Debug, Clone)]
pub struct DownloadInfo {
    pub mode: DownloadMode,
    pub connections_used: u32,
    pub total_size: u64,
    pub error: Option<DownloadError>,
    pub sha256: Option<String>,
}

impl DownloadInfo {
    fn success(mode: DownloadMode, connections: u32, total: u64, sha256: String) -> Self {
        Self {
            mode,
            connections_used: connections,
            total_size: total,
            error: None,
            sha256: Some(sha256),
        }
        .validated()
    }

    fn failure(mode: DownloadMode, connections: u32, total: u64, error: DownloadError) -> Self {
        Self {
            mode,
            connections_used: connections,
            total_size: total,
            error: Some(error),
            sha256: None,
        }
        .validated()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Human-readable error text, empty on success.
    pub fn error_text(&self) -> String {
        self.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
    }

    /// Enforce the outcome invariant before the value leaves the coordinator.
    fn validated(mut self) -> Self {
        if self.error.is_none() == self.sha256.is_none() {
            tracing::error!(
                "download info contract violated: error={:?} sha256={:?}",
                self.error,
                self.sha256
            );
            self.sha256 = None;
            self.error = Some(DownloadError::new(
                ErrorKind::ContractViolation,
                "inconsistent download outcome",
            ));
        }
        self
    }
}

/// Paces validated progress updates to the external callback and raw byte
/// counts to the task owner.
struct ProgressEmitter<'a> {
    filename: String,
    progress_fn: Option<&'a ProgressFn>,
    observer: Option<&'a dyn ProgressObserver>,
    last_bytes: u64,
    last_at: Instant,
}

impl<'a> ProgressEmitter<'a> {
    fn new(
        destination: &std::path::Path,
        progress_fn: Option<&'a ProgressFn>,
        observer: Option<&'a dyn ProgressObserver>,
        initial_bytes: u64,
    ) -> Self {
        let filename = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        Self {
            filename,
            progress_fn,
            observer,
            last_bytes: initial_bytes,
            last_at: Instant::now(),
        }
    }

    fn emit(
        &mut self,
        bytes: u64,
        total: Option<u64>,
        status: &str,
    ) -> Result<(), DownloadError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_at).as_secs_f64();
        let throughput = if dt > 0.0 {
            bytes.saturating_sub(self.last_bytes) as f64 / dt
        } else {
            0.0
        };
        self.last_bytes = bytes;
        self.last_at = now;

        let fraction = match total {
            Some(t) if t > 0 => (bytes as f64 / t as f64).min(1.0),
            Some(_) => 1.0, // zero-byte resource
            None => {
                if status == "completed" {
                    1.0
                } else {
                    0.0
                }
            }
        };
        let update = ProgressUpdate {
            filename: self.filename.clone(),
            progress: fraction,
            speed: format_speed(throughput),
            status: status.to_string(),
        };
        if let Err(e) = update.validate() {
            tracing::error!("PROGRESS_CALLBACK_INVALID | {e}");
            return Err(e);
        }
        if let Some(f) = self.progress_fn {
            f(&update);
        }
        if let Some(o) = self.observer {
            o.on_progress(&TaskProgress {
                bytes_downloaded: bytes,
                bytes_total: total.unwrap_or(0),
                throughput_bps: throughput,
            });
        }
        Ok(())
    }
}

/// The default HTTP(S) download executor.
pub struct Coordinator {
    cfg: CoordinatorConfig,
    limiters: LimiterChain,
}

impl Coordinator {
    pub fn new(cfg: CoordinatorConfig, limiters: LimiterChain) -> Self {
        Self { cfg, limiters }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.cfg
    }

    /// Download `req.url` to `req.destination`, choosing multi or single mode
    /// from the probe result. Never panics on failure; the outcome carries the
    /// classified error for the scheduler.
    pub fn download(
        &self,
        req: &DownloadRequest,
        cancel: &CancelToken,
        progress_fn: Option<&ProgressFn>,
        observer: Option<&dyn ProgressObserver>,
    ) -> DownloadInfo {
        if let Some(parent) = req.destination.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return DownloadInfo::failure(
                        DownloadMode::Single,
                        0,
                        0,
                        DownloadError::new(
                            ErrorKind::IoWrite,
                            format!("create {}: {}", parent.display(), e),
                        ),
                    );
                }
            }
        }

        let probed = match probe::probe(&req.url) {
            Ok(p) => p,
            Err(e) => return DownloadInfo::failure(DownloadMode::Single, 0, 0, e),
        };

        // Fresh task-scope bucket per download; the global bucket is shared.
        let limiters = self.limiters.per_download();
        match self.choose_mode(&probed) {
            (DownloadMode::Multi, segment_count) => {
                let total = probed.total_size.unwrap_or(0);
                self.download_multi(
                    req, total, &probed, segment_count, &limiters, cancel, progress_fn, observer,
                )
            }
            (DownloadMode::Single, _) => self.download_single(
                req,
                probed.total_size,
                &limiters,
                cancel,
                progress_fn,
                observer,
            ),
        }
    }

    /// Single-stream when the resource is small, ranges are unverified, or
    /// only one connection is allowed; otherwise multi with
    /// `min(max_connections, ceil(total / min_segment_size))` segments.
    fn choose_mode(&self, probed: &ProbeResult) -> (DownloadMode, usize) {
        let Some(total) = probed.total_size else {
            return (DownloadMode::Single, 1);
        };
        if total < self.cfg.multi_connection_threshold_bytes
            || !probed.range_support.usable()
            || self.cfg.max_connections <= 1
        {
            return (DownloadMode::Single, 1);
        }
        let by_size = total.div_ceil(self.cfg.min_segment_size_bytes.max(1));
        let n = (self.cfg.max_connections as u64).min(by_size).max(1) as usize;
        if n <= 1 {
            (DownloadMode::Single, 1)
        } else {
            (DownloadMode::Multi, n)
        }
    }

    fn cadence(&self) -> Duration {
        // Fixed cadence with bounded jitter so concurrent tasks do not beat.
        self.cfg.progress_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=50))
    }

    #[allow(clippy::too_many_arguments)]
    fn download_single(
        &self,
        req: &DownloadRequest,
        total_hint: Option<u64>,
        limiters: &LimiterChain,
        cancel: &CancelToken,
        progress_fn: Option<&ProgressFn>,
        observer: Option<&dyn ProgressObserver>,
    ) -> DownloadInfo {
        let temp = storage::temp_path(&req.destination);
        let mut emitter = ProgressEmitter::new(&req.destination, progress_fn, observer, 0);
        let cadence = self.cadence();
        let mut last_emit = Instant::now();
        let mut contract_broken = false;

        let result = download_single_stream(
            &req.url,
            &temp,
            limiters,
            cancel,
            self.cfg.chunk_size_bytes,
            &mut |bytes| {
                if !contract_broken && last_emit.elapsed() >= cadence {
                    last_emit = Instant::now();
                    contract_broken = emitter.emit(bytes, total_hint, "downloading").is_err();
                }
            },
        );

        let (bytes, digest) = match result {
            Ok(_) if cancel.is_cancelled() => {
                // Cancelled between the last chunk and commit: nothing lands.
                let _ = fs::remove_file(&temp);
                return DownloadInfo::failure(
                    DownloadMode::Single,
                    1,
                    total_hint.unwrap_or(0),
                    DownloadError::cancelled(),
                );
            }
            Ok(ok) => ok,
            Err(e) => {
                // Single-mode keeps nothing behind: cancel and failure both
                // remove the temp file.
                let _ = fs::remove_file(&temp);
                return DownloadInfo::failure(
                    DownloadMode::Single,
                    1,
                    total_hint.unwrap_or(0),
                    e,
                );
            }
        };

        if contract_broken {
            let _ = fs::remove_file(&temp);
            return DownloadInfo::failure(
                DownloadMode::Single,
                1,
                total_hint.unwrap_or(0),
                DownloadError::new(ErrorKind::ContractViolation, "progress callback shape invalid"),
            );
        }

        if let Some(expected) = total_hint {
            if bytes != expected {
                let _ = fs::remove_file(&temp);
                return DownloadInfo::failure(
                    DownloadMode::Single,
                    1,
                    expected,
                    DownloadError::new(
                        ErrorKind::Network,
                        format!("partial transfer: {bytes} of {expected} bytes"),
                    ),
                );
            }
        }
        if let Err(e) = checksum::verify_digest(&digest, req.expected_sha256.as_deref()) {
            let _ = fs::remove_file(&temp);
            return DownloadInfo::failure(DownloadMode::Single, 1, bytes, e);
        }

        tracing::info!("HASH | START");
        tracing::info!("HASH | FINAL_OK | sha256={digest}");
        tracing::info!("ATOMIC | START | temp={}", temp.display());
        if let Err(e) = storage::commit(&temp, &req.destination) {
            let _ = fs::remove_file(&temp);
            return DownloadInfo::failure(
                DownloadMode::Single,
                1,
                bytes,
                DownloadError::new(ErrorKind::IoWrite, format!("atomic commit failed: {e:#}")),
            );
        }
        tracing::info!("ATOMIC | COMMIT_OK | final={}", req.destination.display());

        let _ = emitter.emit(bytes, Some(bytes), "completed");
        DownloadInfo::success(DownloadMode::Single, 1, bytes, digest)
    }

    #[allow(clippy::too_many_arguments)]
    fn download_multi(
        &self,
        req: &DownloadRequest,
        total: u64,
        probed: &ProbeResult,
        segment_count: usize,
        limiters: &LimiterChain,
        cancel: &CancelToken,
        progress_fn: Option<&ProgressFn>,
        observer: Option<&dyn ProgressObserver>,
    ) -> DownloadInfo {
        let dest = &req.destination;
        let connections = segment_count as u32;

        let (segments, resumed_bytes) =
            match self.plan_or_resume(req, total, probed, segment_count) {
                Ok(pair) => pair,
                Err(e) => return DownloadInfo::failure(DownloadMode::Multi, connections, total, e),
            };
        let connections = segments.len() as u32;

        let counters: Arc<Vec<AtomicU64>> = Arc::new(
            resumed_bytes.iter().map(|b| AtomicU64::new(*b)).collect(),
        );
        let siblings = CancelToken::new();
        let stop = SegmentStop {
            user: cancel.clone(),
            siblings: siblings.clone(),
        };

        let (tx, rx) = mpsc::channel::<(usize, Result<(), DownloadError>)>();
        let mut handles = Vec::new();
        let mut remaining = 0usize;
        for segment in &segments {
            let resume_from = resumed_bytes[segment.index];
            if resume_from >= segment.len() {
                continue;
            }
            remaining += 1;
            let url = req.url.clone();
            let segment = *segment;
            let part = storage::segment_path(dest, segment.index);
            let counters = Arc::clone(&counters);
            let limiters = limiters.clone();
            let stop = stop.clone();
            let chunk = self.cfg.chunk_size_bytes;
            let tx = tx.clone();
            handles.push(std::thread::spawn(move || {
                let res = download_segment(
                    &url,
                    &segment,
                    &part,
                    resume_from,
                    &counters[segment.index],
                    &limiters,
                    &stop,
                    chunk,
                );
                let _ = tx.send((segment.index, res));
            }));
        }
        drop(tx);

        let mut emitter =
            ProgressEmitter::new(dest, progress_fn, observer, sum_counters(&counters, total));
        let mut first_error: Option<DownloadError> = None;
        let mut to_receive = remaining;
        // First update goes out immediately so the task owner sees the
        // transfer leave STARTING without waiting a full cadence.
        if let Err(e) = emitter.emit(sum_counters(&counters, total), Some(total), "downloading") {
            first_error = Some(e);
            siblings.cancel();
        }
        while to_receive > 0 {
            match rx.recv_timeout(self.cadence()) {
                Ok((_, Ok(()))) => to_receive -= 1,
                Ok((index, Err(e))) => {
                    to_receive -= 1;
                    if !e.is_cancelled() && first_error.is_none() {
                        tracing::warn!("segment {index} failed: {e}");
                        first_error = Some(e);
                        siblings.cancel();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if first_error.is_none() {
                        if let Err(e) =
                            emitter.emit(sum_counters(&counters, total), Some(total), "downloading")
                        {
                            first_error = Some(e);
                            siblings.cancel();
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for handle in handles {
            if handle.join().is_err() && first_error.is_none() {
                first_error = Some(DownloadError::new(
                    ErrorKind::ContractViolation,
                    "segment worker panicked",
                ));
            }
        }

        let record =
            ResumeRecord::with_progress(&req.url, total, probed, &segments, &counter_values(&counters));

        if cancel.is_cancelled() {
            if self.cfg.cleanup_on_cancel {
                resume::delete(dest);
                remove_parts(dest, &segments);
            } else if let Err(e) = resume::save(dest, &record) {
                tracing::warn!("failed to persist resume state: {e:#}");
            }
            return DownloadInfo::failure(
                DownloadMode::Multi,
                connections,
                total,
                DownloadError::cancelled(),
            );
        }

        if let Some(e) = first_error {
            // Keep byte counts so a retry only redrives what is missing.
            if let Err(save_err) = resume::save(dest, &record) {
                tracing::warn!("failed to persist resume state: {save_err:#}");
            }
            return DownloadInfo::failure(DownloadMode::Multi, connections, total, e);
        }

        if let Err(e) = merge::verify_segment_lengths(dest, &segments) {
            if let Err(save_err) = resume::save(dest, &record) {
                tracing::warn!("failed to persist resume state: {save_err:#}");
            }
            return DownloadInfo::failure(DownloadMode::Multi, connections, total, e);
        }

        let digest = match merge::merge_and_commit(
            dest,
            &segments,
            total,
            req.expected_sha256.as_deref(),
        ) {
            Ok(digest) => digest,
            Err(e) => {
                if e.kind() == ErrorKind::ChecksumMismatch {
                    // The data is bad; resuming it would reproduce the mismatch.
                    resume::delete(dest);
                    remove_parts(dest, &segments);
                } else if let Err(save_err) = resume::save(dest, &record) {
                    tracing::warn!("failed to persist resume state: {save_err:#}");
                }
                return DownloadInfo::failure(DownloadMode::Multi, connections, total, e);
            }
        };

        resume::delete(dest);
        let _ = emitter.emit(total, Some(total), "completed");
        DownloadInfo::success(DownloadMode::Multi, connections, total, digest)
    }

    /// Reuse a valid resume record for this destination, else lay down a
    /// fresh plan and persist it before any byte is transferred.
    fn plan_or_resume(
        &self,
        req: &DownloadRequest,
        total: u64,
        probed: &ProbeResult,
        segment_count: usize,
    ) -> Result<(Vec<Segment>, Vec<u64>), DownloadError> {
        let dest = &req.destination;
        if let Some(record) = resume::load(dest) {
            if record.matches_remote(&req.url, total, probed) && probed.is_stable() {
                let segments = record.plan();
                let bytes = segments
                    .iter()
                    .map(|s| on_disk_bytes(dest, s))
                    .collect::<Vec<_>>();
                tracing::info!(
                    "RESUME | VALIDATED | dest={} | bytes={}",
                    dest.display(),
                    bytes.iter().sum::<u64>()
                );
                return Ok((segments, bytes));
            }
            tracing::info!("RESUME | INVALIDATED | dest={}", dest.display());
            resume::delete(dest);
            remove_parts(dest, &record.plan());
        }

        let segments = plan_segments(total, segment_count);
        remove_parts(dest, &segments);
        let record = ResumeRecord::new(&req.url, total, probed, &segments);
        resume::save(dest, &record)?;
        let zeros = vec![0; segments.len()];
        Ok((segments, zeros))
    }
}

/// Bytes already on disk for a segment's part file, clamped to the planned
/// length; anything oversized is treated as absent and redone.
fn on_disk_bytes(dest: &std::path::Path, segment: &Segment) -> u64 {
    match fs::metadata(storage::segment_path(dest, segment.index)) {
        Ok(m) if m.len() <= segment.len() => m.len(),
        _ => 0,
    }
}

fn sum_counters(counters: &[AtomicU64], total: u64) -> u64 {
    counters
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum::<u64>()
        .min(total)
}

fn counter_values(counters: &[AtomicU64]) -> Vec<u64> {
    counters.iter().map(|c| c.load(Ordering::Relaxed)).collect()
}

fn remove_parts(dest: &std::path::Path, segments: &[Segment]) {
    for segment in segments {
        let part = storage::segment_path(dest, segment.index);
        if part.exists() {
            let _ = fs::remove_file(&part);
        }
    }
}
