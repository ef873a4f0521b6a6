//! Minimal HTTP/1.1 server with HEAD and Range GET support for integration
//! tests.
//!
//! Serves a single static body at any path. Options cover the failure modes
//! the engine must handle: HEAD blocked, ranges refused or merely advertised,
//! throttled body delivery, and scripted HTTP errors for retry tests.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even when ranges work. If true
    /// while `support_ranges` is false, the server advertises support it does
    /// not honor.
    pub advertise_ranges: bool,
    /// Sleep between body chunks; slows transfers so progress and
    /// cancellation behavior is observable.
    pub chunk_delay: Option<Duration>,
    /// Body write granularity.
    pub body_chunk: usize,
    /// Fail the first N body GETs with this status (probe GETs for
    /// `bytes=0-0` are not counted).
    pub fail_first_gets: Option<(u32, usize)>,
    /// `Retry-After` seconds attached to scripted failures.
    pub retry_after: Option<u64>,
    /// `ETag` header value, when present.
    pub etag: Option<String>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            chunk_delay: None,
            body_chunk: 64 * 1024,
            fail_first_gets: None,
            retry_after: None,
            etag: Some("\"rs-test-1\"".to_string()),
        }
    }
}

struct ServerState {
    body: Vec<u8>,
    opts: RangeServerOptions,
    body_gets: AtomicUsize,
}

/// Handle to a running test server.
pub struct RangeServer {
    pub base_url: String,
    state: Arc<ServerState>,
}

impl RangeServer {
    /// Number of body GETs served (excluding `bytes=0-0` probes).
    pub fn body_get_count(&self) -> usize {
        self.state.body_gets.load(Ordering::Relaxed)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Start a server with default options serving `body`. Runs until the
/// process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServerState {
        body,
        opts,
        body_gets: AtomicUsize::new(0),
    });
    let accept_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&accept_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    RangeServer {
        base_url: format!("http://127.0.0.1:{}/", port),
        state,
    }
}

fn handle(mut stream: std::net::TcpStream, state: &ServerState) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);
    let total = state.body.len() as u64;
    let opts = &state.opts;

    let etag_header = opts
        .etag
        .as_ref()
        .map(|e| format!("ETag: {e}\r\n"))
        .unwrap_or_default();
    let accept_ranges = if opts.advertise_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}{etag_header}Connection: close\r\n\r\n"
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    let is_probe = range == Some((0, 0)) && total > 1;
    if !is_probe {
        let count = state.body_gets.fetch_add(1, Ordering::SeqCst);
        if let Some((status, fail_count)) = opts.fail_first_gets {
            if count < fail_count {
                let retry_after = opts
                    .retry_after
                    .map(|s| format!("Retry-After: {s}\r\n"))
                    .unwrap_or_default();
                let reason = match status {
                    429 => "Too Many Requests",
                    503 => "Service Unavailable",
                    _ => "Error",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n{retry_after}Connection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
        }
    }

    let (status_line, range_header, slice) = if opts.support_ranges {
        match range {
            Some((start, end_incl)) => {
                let start = start.min(total);
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl && total > 0 {
                    (
                        "416 Range Not Satisfiable".to_string(),
                        format!("Content-Range: bytes */{total}\r\n"),
                        &state.body[0..0],
                    )
                } else {
                    let s = start as usize;
                    let e = ((end_incl + 1).min(total)) as usize;
                    (
                        "206 Partial Content".to_string(),
                        format!("Content-Range: bytes {start}-{end_incl}/{total}\r\n"),
                        state.body.get(s..e).unwrap_or(&state.body[0..0]),
                    )
                }
            }
            None => ("200 OK".to_string(), String::new(), &state.body[..]),
        }
    } else {
        ("200 OK".to_string(), String::new(), &state.body[..])
    };

    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\n{range_header}{accept_ranges}{etag_header}Connection: close\r\n\r\n",
        slice.len()
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }
    for chunk in slice.chunks(opts.body_chunk.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        if let Some(delay) = opts.chunk_delay {
            thread::sleep(delay);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(ranges) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = ranges.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
