//! URL host normalization for per-host concurrency accounting.
//!
//! Keys are the lowercase hostname with the port stripped. Comparing the raw
//! authority would let `host:port` slip past host-keyed limits.

/// Extract the normalized host from a URL: lowercase, no port.
/// Returns `None` for URLs without a host (or unparseable input).
pub fn normalize_host(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_hostname() {
        assert_eq!(
            normalize_host("https://Example.COM/file.iso"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn strips_port() {
        assert_eq!(
            normalize_host("http://example.com:8080/x"),
            Some("example.com".to_string())
        );
        // Same host on two ports must share one key.
        assert_eq!(
            normalize_host("http://example.com:8080/x"),
            normalize_host("http://example.com:9090/y")
        );
    }

    #[test]
    fn ip_and_localhost() {
        assert_eq!(
            normalize_host("http://127.0.0.1:50183/range/test.dat"),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(
            normalize_host("https://localhost/x"),
            Some("localhost".to_string())
        );
    }

    #[test]
    fn malformed_url_is_none() {
        assert_eq!(normalize_host("not a url"), None);
        assert_eq!(normalize_host(""), None);
    }
}
