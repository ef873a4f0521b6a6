//! Single-stream GET fallback.
//!
//! One sequential GET into `<final>.part`, hashing while writing so the
//! commit step needs no second pass. Used when ranges are unsupported, the
//! resource is small, or only one connection is allowed.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::checksum::StreamingSha256;
use crate::control::CancelToken;
use crate::limiter::LimiterChain;
use crate::retry::{
    classify_curl_error, classify_http_status, classify_io_error, parse_retry_after,
    DownloadError, ErrorKind,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LOW_SPEED_LIMIT: u32 = 1024;
const LOW_SPEED_TIME: Duration = Duration::from_secs(60);
const HARD_TIMEOUT: Duration = Duration::from_secs(3600);

fn curl_err(e: curl::Error) -> DownloadError {
    DownloadError::new(classify_curl_error(&e), e.to_string())
}

/// Stream `url` into `temp_path`. Calls `on_chunk` with the cumulative byte
/// count after each write so the coordinator can pace progress output.
/// Returns `(bytes_written, sha256_hex)`.
pub(super) fn download_single_stream(
    url: &str,
    temp_path: &Path,
    limiters: &LimiterChain,
    cancel: &CancelToken,
    chunk_size: usize,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<(u64, String), DownloadError> {
    let file = File::create(temp_path).map_err(|e| {
        DownloadError::new(
            classify_io_error(&e),
            format!("create {}: {}", temp_path.display(), e),
        )
    })?;
    let file = RefCell::new(file);
    let hasher = RefCell::new(StreamingSha256::new());
    let written = Cell::new(0u64);
    let cancelled = Cell::new(false);
    let io_error = RefCell::new(None::<std::io::Error>);
    let status = Cell::new(0u32);
    let retry_after = Cell::new(None::<Duration>);

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

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(line) = std::str::from_utf8(data) {
                    let line = line.trim_end();
                    if let Some(rest) = line.strip_prefix("HTTP/") {
                        retry_after.set(None);
                        status.set(
                            rest.split_whitespace()
                                .nth(1)
                                .and_then(|s| s.parse::<u32>().ok())
                                .unwrap_or(0),
                        );
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
                if cancel.is_cancelled() {
                    cancelled.set(true);
                    return Ok(0);
                }
                if (300..400).contains(&status.get()) {
                    return Ok(data.len());
                }
                if !(200..300).contains(&status.get()) {
                    // Let perform finish classifying via the status below.
                    return Ok(0);
                }
                if limiters.consume(data.len() as u64, cancel).is_err() {
                    cancelled.set(true);
                    return Ok(0);
                }
                if let Err(e) = file.borrow_mut().write_all(data) {
                    io_error.replace(Some(e));
                    return Ok(0);
                }
                hasher.borrow_mut().update(data);
                written.set(written.get() + data.len() as u64);
                on_chunk(written.get());
                Ok(data.len())
            })
            .map_err(curl_err)?;

        if let Err(e) = transfer.perform() {
            if cancelled.get() || cancel.is_cancelled() {
                return Err(DownloadError::cancelled());
            }
            if let Some(io) = io_error.borrow_mut().take() {
                return Err(DownloadError::new(classify_io_error(&io), io.to_string()));
            }
            let code = status.get();
            if !(200..300).contains(&code) && code != 0 {
                return Err(DownloadError::new(
                    classify_http_status(code),
                    format!("GET {url} returned HTTP {code}"),
                )
                .with_retry_after(retry_after.get()));
            }
            return Err(curl_err(e));
        }
    }

    let code = easy.response_code().map_err(curl_err)? as u32;
    if !(200..300).contains(&code) {
        return Err(DownloadError::new(
            classify_http_status(code),
            format!("GET {url} returned HTTP {code}"),
        )
        .with_retry_after(retry_after.get()));
    }

    let mut f = file.into_inner();
    f.flush()
        .and_then(|_| f.sync_all())
        .map_err(|e| DownloadError::new(classify_io_error(&e), e.to_string()))?;
    Ok((written.get(), hasher.into_inner().finish()))
}
