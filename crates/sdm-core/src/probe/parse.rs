//! Parse HTTP response header lines into a ProbeResult.

use super::{ProbeResult, RangeSupport};
use crate::retry::{DownloadError, ErrorKind};

/// Parse collected header lines. `Accept-Ranges: bytes` alone yields
/// advertised-only support; observation is decided by the caller from the
/// probe's status code. A malformed Content-Length is a protocol error.
pub(crate) fn parse_headers(lines: &[String]) -> Result<ProbeResult, DownloadError> {
    let mut total_size = None;
    let mut range_support = RangeSupport::Unsupported;
    let mut etag = None;
    let mut last_modified = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with("HTTP/") {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            total_size = Some(value.parse::<u64>().map_err(|_| {
                DownloadError::new(
                    ErrorKind::Protocol,
                    format!("unparseable Content-Length: {value}"),
                )
            })?);
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            if value.eq_ignore_ascii_case("bytes") {
                range_support = RangeSupport::AdvertisedOnly;
            }
        } else if name.eq_ignore_ascii_case("etag") {
            etag = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            last_modified = Some(value.to_string());
        }
    }

    Ok(ProbeResult {
        total_size,
        range_support,
        etag,
        last_modified,
    })
}

/// Total size from a `Content-Range` value, e.g. `bytes 0-0/12345` -> 12345.
/// `*` (unknown) yields `None`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.split_once('/')?;
    let total = total.trim();
    if total == "*" {
        return None;
    }
    total.parse::<u64>().ok()
}
