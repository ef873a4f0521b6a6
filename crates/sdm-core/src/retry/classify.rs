//! Classify HTTP status codes, curl errors, and I/O errors into error kinds.

use super::error::ErrorKind;

/// Classify a non-2xx HTTP status for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 => ErrorKind::Http408,
        429 => ErrorKind::Http429,
        400..=499 => ErrorKind::Http4xxOther,
        500..=599 => ErrorKind::Http5xx,
        _ => ErrorKind::Protocol,
    }
}

/// Classify a curl transport error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    // Certificate verification failures are terminal, unlike handshake-level
    // connection trouble.
    if e.is_ssl_certproblem() || e.is_peer_failed_verification() || e.is_ssl_cacert() {
        return ErrorKind::Protocol;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_ssl_connect_error()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Network;
    }
    ErrorKind::Protocol
}

/// Classify a local write failure: no-space is its own terminal kind,
/// everything else is a transient IO_WRITE.
pub fn classify_io_error(e: &std::io::Error) -> ErrorKind {
    // ENOSPC
    if e.raw_os_error() == Some(28) {
        ErrorKind::DiskFull
    } else {
        ErrorKind::IoWrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_408_have_dedicated_kinds() {
        assert_eq!(classify_http_status(429), ErrorKind::Http429);
        assert_eq!(classify_http_status(408), ErrorKind::Http408);
    }

    #[test]
    fn http_5xx_retryable_4xx_terminal() {
        assert!(classify_http_status(500).is_retryable());
        assert!(classify_http_status(503).is_retryable());
        assert!(!classify_http_status(404).is_retryable());
        assert!(!classify_http_status(403).is_retryable());
    }

    #[test]
    fn odd_status_is_protocol() {
        assert_eq!(classify_http_status(999), ErrorKind::Protocol);
        assert_eq!(classify_http_status(101), ErrorKind::Protocol);
    }

    #[test]
    fn disk_full_detected_by_errno() {
        let e = std::io::Error::from_raw_os_error(28);
        assert_eq!(classify_io_error(&e), ErrorKind::DiskFull);
        let other = std::io::Error::new(std::io::ErrorKind::Other, "short write");
        assert_eq!(classify_io_error(&other), ErrorKind::IoWrite);
    }
}
