//! Single-segment ranged GET into its per-segment part file.
//!
//! Streams one byte range with curl, consuming the limiter chain and checking
//! the stop signals on every chunk. Never retries; failures are classified
//! and returned for the scheduler to decide.

use std::cell::{Cell, RefCell};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::control::CancelToken;
use crate::limiter::LimiterChain;
use crate::retry::{
    classify_curl_error, classify_http_status, classify_io_error, parse_retry_after,
    DownloadError, ErrorKind,
};
use crate::segmenter::Segment;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Abort when throughput stays under 1 KiB/s for 60 s; a hard wall-clock cap
/// backstops a completely wedged transfer.
const LOW_SPEED_LIMIT: u32 = 1024;
const LOW_SPEED_TIME: Duration = Duration::from_secs(60);
const HARD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Why a transfer was stopped from our side of the write callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    Cancelled,
    BadStatus,
    WriteFailed,
}

/// Stop signals a worker watches: the task's own cancel token plus the
/// coordinator's sibling-abort signal raised when another segment fails.
#[derive(Clone)]
pub(super) struct SegmentStop {
    pub user: CancelToken,
    pub siblings: CancelToken,
}

impl SegmentStop {
    fn triggered(&self) -> bool {
        self.user.is_cancelled() || self.siblings.is_cancelled()
    }
}

fn curl_err(e: curl::Error) -> DownloadError {
    DownloadError::new(classify_curl_error(&e), e.to_string())
}

/// Download `segment` of `url` into `part_path`, appending after
/// `resume_from` already-present bytes. `counter` carries the segment's total
/// byte count (pre-seeded with `resume_from`) for progress aggregation.
pub(super) fn download_segment(
    url: &str,
    segment: &Segment,
    part_path: &Path,
    resume_from: u64,
    counter: &AtomicU64,
    limiters: &LimiterChain,
    stop: &SegmentStop,
    chunk_size: usize,
) -> Result<(), DownloadError> {
    if resume_from >= segment.len() {
        return Ok(());
    }

    let file = if resume_from > 0 {
        OpenOptions::new().append(true).open(part_path)
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(part_path)
    };
    let file = file.map_err(|e| {
        DownloadError::new(
            classify_io_error(&e),
            format!("open {}: {}", part_path.display(), e),
        )
    })?;
    let file = RefCell::new(file);

    let abort = Cell::new(None::<AbortReason>);
    let io_error = RefCell::new(None::<std::io::Error>);
    let status = Cell::new(0u32);
    let retry_after = Cell::new(None::<Duration>);
    let written_this_run = Cell::new(0u64);

    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|_| DownloadError::new(ErrorKind::Validation, format!("invalid URL: {url}")))?;
    easy.follow_location(true).map_err(curl_err)?;
    easy.max_redirections(10).map_err(curl_err)?;
    easy.connect_timeout(CONNECT_TIMEOUT).map_err(curl_err)?;
    easy.low_speed_limit(LOW_SPEED_LIMIT).map_err(curl_err)?;
    easy.low_speed_time(LOW_SPEED_TIME).map_err(curl_err)?;
    easy.timeout(HARD_TIMEOUT).map_err(curl_err)?;
    easy.buffer_size(chunk_size.max(1024)).map_err(curl_err)?;
    easy.range(&format!("{}-{}", segment.start + resume_from, segment.end))
        .map_err(curl_err)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(line) = std::str::from_utf8(data) {
                    let line = line.trim_end();
                    if let Some(rest) = line.strip_prefix("HTTP/") {
                        // New response block (redirect hop): reset per-response state.
                        retry_after.set(None);
                        let code = rest
                            .split_whitespace()
                            .nth(1)
                            .and_then(|s| s.parse::<u32>().ok())
                            .unwrap_or(0);
                        status.set(code);
                    } else if let Some((name, value)) = line.split_once(':') {
                        if name.trim().eq_ignore_ascii_case("retry-after") {
                            retry_after.set(parse_retry_after(value));
                        }
                    }
                }
                true
            })
            .map_err(curl_err)?;
        transfer
            .write_function(|data| {
                if stop.triggered() {
                    abort.set(Some(AbortReason::Cancelled));
                    return Ok(0);
                }
                // Redirect hop bodies are noise; skip them while curl follows.
                if (300..400).contains(&status.get()) {
                    return Ok(data.len());
                }
                // Only a 206 body belongs in the part file; a 200 would be the
                // full resource streamed from byte zero.
                if status.get() != 206 {
                    abort.set(Some(AbortReason::BadStatus));
                    return Ok(0);
                }
                if limiters
                    .consume(data.len() as u64, &stop.user)
                    .is_err()
                {
                    abort.set(Some(AbortReason::Cancelled));
                    return Ok(0);
                }
                if let Err(e) = file.borrow_mut().write_all(data) {
                    io_error.replace(Some(e));
                    abort.set(Some(AbortReason::WriteFailed));
                    return Ok(0);
                }
                counter.fetch_add(data.len() as u64, Ordering::Relaxed);
                written_this_run.set(written_this_run.get() + data.len() as u64);
                Ok(data.len())
            })
            .map_err(curl_err)?;

        if let Err(e) = transfer.perform() {
            match abort.get() {
                Some(AbortReason::Cancelled) => return Err(DownloadError::cancelled()),
                Some(AbortReason::BadStatus) => {
                    return Err(segment_status_error(url, status.get(), retry_after.get()));
                }
                Some(AbortReason::WriteFailed) => {
                    let io = io_error.borrow_mut().take();
                    let (kind, msg) = match io {
                        Some(io) => (classify_io_error(&io), io.to_string()),
                        None => (ErrorKind::IoWrite, "write failed".to_string()),
                    };
                    return Err(DownloadError::new(
                        kind,
                        format!("segment {}: {}", segment.index, msg),
                    ));
                }
                None => return Err(curl_err(e)),
            }
        }
    }

    let code = easy.response_code().map_err(curl_err)? as u32;
    if code != 206 {
        return Err(segment_status_error(url, code, retry_after.get()));
    }

    let have = resume_from + written_this_run.get();
    if have != segment.len() {
        // Server closed early; retryable so the scheduler can pick it back up.
        return Err(DownloadError::new(
            ErrorKind::Network,
            format!(
                "segment {}: partial transfer, {} of {} bytes",
                segment.index,
                have,
                segment.len()
            ),
        ));
    }

    file.borrow_mut().flush().map_err(|e| {
        DownloadError::new(
            classify_io_error(&e),
            format!("flush {}: {}", part_path.display(), e),
        )
    })?;
    Ok(())
}

fn segment_status_error(url: &str, code: u32, retry_after: Option<Duration>) -> DownloadError {
    if code == 200 {
        // The range was silently ignored; the plan is not executable.
        DownloadError::new(
            ErrorKind::Protocol,
            format!("server ignored range request for {url} (got 200)"),
        )
    } else {
        DownloadError::new(
            classify_http_status(code),
            format!("ranged GET {url} returned HTTP {code}"),
        )
        .with_retry_after(retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_200_maps_to_protocol() {
        let e = segment_status_error("http://x/", 200, None);
        assert_eq!(e.kind(), ErrorKind::Protocol);
        assert!(!e.is_retryable());
    }

    #[test]
    fn status_503_carries_retry_after() {
        let e = segment_status_error("http://x/", 503, Some(Duration::from_secs(7)));
        assert_eq!(e.kind(), ErrorKind::Http5xx);
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));
        assert!(e.is_retryable());
    }
}
