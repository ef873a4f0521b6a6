//! HTTP range-capability and metadata probing.
//!
//! Uses the curl crate (libcurl) to confirm `Content-Length`, distinguish
//! advertised from observed range support, and capture ETag/Last-Modified for
//! resume safety. A hard ceiling caps how much probe body is ever read, so a
//! range-ignoring server cannot turn the probe into a full download.

mod parse;

use std::str;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::retry::{classify_curl_error, classify_http_status, DownloadError, ErrorKind};

pub use parse::parse_content_range_total;

/// Most probe body bytes we will ever read before aborting the transfer.
const PROBE_BODY_CEILING: usize = 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// What the server told us about byte-range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSupport {
    /// A ranged probe came back 206 with a Content-Range: ranges verified.
    Observed,
    /// Only `Accept-Ranges: bytes` was advertised; the probe was answered
    /// with a 200. Not good enough for multi-mode.
    AdvertisedOnly,
    Unsupported,
}

impl RangeSupport {
    /// Only observed support qualifies for segmented downloads.
    pub fn usable(self) -> bool {
        self == RangeSupport::Observed
    }
}

/// Parsed probe outcome: size, range capability, and stability validators.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Total size in bytes, when the server declared one.
    pub total_size: Option<u64>,
    pub range_support: RangeSupport,
    /// Strong validator for resume, when present.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ProbeResult {
    /// The resource can be re-validated across requests.
    pub fn is_stable(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

fn curl_err(e: curl::Error) -> DownloadError {
    DownloadError::new(classify_curl_error(&e), e.to_string())
}

fn apply_common_options(easy: &mut curl::easy::Easy) -> Result<(), DownloadError> {
    easy.follow_location(true).map_err(curl_err)?;
    easy.max_redirections(10).map_err(curl_err)?;
    easy.connect_timeout(CONNECT_TIMEOUT).map_err(curl_err)?;
    easy.timeout(PROBE_TIMEOUT).map_err(curl_err)?;
    Ok(())
}

/// HEAD probe: size, advertised range support, validators.
pub fn probe_head(url: &str) -> Result<ProbeResult, DownloadError> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|_| DownloadError::new(ErrorKind::Validation, format!("invalid URL: {url}")))?;
    easy.nobody(true).map_err(curl_err)?;
    apply_common_options(&mut easy)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    // Each redirect hop emits its own header block; keep only
                    // the final response's headers.
                    if line.starts_with("HTTP/") {
                        headers.clear();
                    }
                    headers.push(line.to_string());
                }
                true
            })
            .map_err(curl_err)?;
        transfer.perform().map_err(curl_err)?;
    }

    let code = easy.response_code().map_err(curl_err)? as u32;
    if !(200..300).contains(&code) {
        return Err(DownloadError::new(
            classify_http_status(code),
            format!("HEAD {url} returned HTTP {code}"),
        ));
    }

    parse::parse_headers(&headers)
}

/// Ranged GET probe (`Range: bytes=0-0`): the definitive range test. A 206
/// with Content-Range upgrades support to observed even when HEAD was blocked
/// or silent; at most [`PROBE_BODY_CEILING`] body bytes are ever read.
pub fn probe_range(url: &str) -> Result<ProbeResult, DownloadError> {
    let mut headers: Vec<String> = Vec::new();
    let body_read = AtomicUsize::new(0);
    let ceiling_hit = AtomicBool::new(false);

    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|_| DownloadError::new(ErrorKind::Validation, format!("invalid URL: {url}")))?;
    apply_common_options(&mut easy)?;
    easy.range("0-0").map_err(curl_err)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    if line.starts_with("HTTP/") {
                        headers.clear();
                    }
                    headers.push(line.to_string());
                }
                true
            })
            .map_err(curl_err)?;
        transfer
            .write_function(|data| {
                let seen = body_read.fetch_add(data.len(), Ordering::Relaxed) + data.len();
                if seen > PROBE_BODY_CEILING {
                    // Abort: a range-ignoring server is streaming the full body.
                    ceiling_hit.store(true, Ordering::Relaxed);
                    Ok(0)
                } else {
                    Ok(data.len())
                }
            })
            .map_err(curl_err)?;
        if let Err(e) = transfer.perform() {
            // An abort we caused at the ceiling still leaves usable headers.
            if !(e.is_write_error() && ceiling_hit.load(Ordering::Relaxed)) {
                return Err(curl_err(e));
            }
        }
    }

    let code = easy.response_code().map_err(curl_err)? as u32;
    if !(200..300).contains(&code) {
        return Err(DownloadError::new(
            classify_http_status(code),
            format!("ranged probe of {url} returned HTTP {code}"),
        ));
    }

    let mut result = parse::parse_headers(&headers)?;
    if code == 206 {
        let content_range = headers.iter().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-range")
                .then(|| value.trim().to_string())
        });
        match content_range {
            Some(value) => {
                result.range_support = RangeSupport::Observed;
                if let Some(total) = parse_content_range_total(&value) {
                    result.total_size = Some(total);
                }
            }
            None => {
                return Err(DownloadError::new(
                    ErrorKind::Protocol,
                    format!("206 response from {url} without Content-Range"),
                ));
            }
        }
    } else if result.range_support == RangeSupport::Observed {
        // A 200 to a ranged request downgrades whatever was advertised.
        result.range_support = RangeSupport::AdvertisedOnly;
    }
    Ok(result)
}

/// Best-effort probe: HEAD first, then the ranged GET when HEAD fails or
/// leaves size or range support undetermined; results are merged preferring
/// observed capability. Fails `UNSUPPORTED` only when neither size nor range
/// support could be determined at all.
pub fn probe(url: &str) -> Result<ProbeResult, DownloadError> {
    let merged = match probe_head(url) {
        Ok(head) => {
            if head.total_size.is_some() && head.range_support == RangeSupport::Observed {
                return Ok(head);
            }
            match probe_range(url) {
                Ok(ranged) => merge(head, ranged),
                Err(_) => head,
            }
        }
        Err(head_err) => match probe_range(url) {
            Ok(ranged) => ranged,
            // The ranged error usually carries the more specific status; the
            // HEAD error wins only when the GET never got a response either.
            Err(ranged_err) => {
                return Err(if ranged_err.kind() == ErrorKind::Network {
                    head_err
                } else {
                    ranged_err
                });
            }
        },
    };

    if merged.total_size.is_none() && !merged.range_support.usable() {
        return Err(DownloadError::new(
            ErrorKind::Unsupported,
            format!("cannot determine size or range support for {url}"),
        ));
    }
    Ok(merged)
}

fn merge(head: ProbeResult, ranged: ProbeResult) -> ProbeResult {
    ProbeResult {
        total_size: ranged.total_size.or(head.total_size),
        // The ranged GET is authoritative: it observed what the server does,
        // not what it advertises.
        range_support: match (head.range_support, ranged.range_support) {
            (_, RangeSupport::Observed) => RangeSupport::Observed,
            (RangeSupport::AdvertisedOnly, _) | (_, RangeSupport::AdvertisedOnly) => {
                RangeSupport::AdvertisedOnly
            }
            _ => RangeSupport::Unsupported,
        },
        etag: ranged.etag.or(head.etag),
        last_modified: ranged.last_modified.or(head.last_modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(support: RangeSupport, size: Option<u64>) -> ProbeResult {
        ProbeResult {
            total_size: size,
            range_support: support,
            etag: None,
            last_modified: None,
        }
    }

    #[test]
    fn merge_prefers_observed_support_and_ranged_size() {
        let head = result(RangeSupport::AdvertisedOnly, Some(10));
        let ranged = result(RangeSupport::Observed, Some(20));
        let m = merge(head, ranged);
        assert_eq!(m.range_support, RangeSupport::Observed);
        assert_eq!(m.total_size, Some(20));
    }

    #[test]
    fn merge_downgrades_advertised_without_observation() {
        let head = result(RangeSupport::AdvertisedOnly, Some(10));
        let ranged = result(RangeSupport::Unsupported, None);
        let m = merge(head, ranged);
        assert_eq!(m.range_support, RangeSupport::AdvertisedOnly);
        assert!(!m.range_support.usable());
        assert_eq!(m.total_size, Some(10));
    }

    #[test]
    fn stability_requires_a_validator() {
        let mut r = result(RangeSupport::Observed, Some(10));
        assert!(!r.is_stable());
        r.etag = Some("\"abc\"".to_string());
        assert!(r.is_stable());
    }
}
