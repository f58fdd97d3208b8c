//! Minimal HTTP/1.1 server with HEAD and Range GET support for integration
//! tests.
//!
//! Serves a single static body. HEAD answers with Content-Length and
//! Accept-Ranges; GET with a Range header answers 206 Partial Content.
//! Fault injection covers servers that ignore ranges, block HEAD, throttle
//! the body, or fail the first GET per range with a 503.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// If true, HEAD returns 405 (simulates servers that block HEAD).
    pub block_head: bool,
    /// If true, GET ignores Range and always returns 200 with the full body.
    pub ignore_ranges: bool,
    /// Sent on HEAD responses when set (filename hint).
    pub content_disposition: Option<String>,
    /// Sent on HEAD responses when set (extension fallback).
    pub content_type: Option<String>,
    /// The first GET for each distinct Range fails with 503, the retry
    /// succeeds.
    pub fail_first_get: bool,
    /// Write the body in chunks of the given size, sleeping the given delay
    /// between them, so tests can pause or observe a transfer mid-flight.
    pub throttle: Option<(usize, Duration)>,
}

/// Handle to a running test server.
pub struct RangeServer {
    url: String,
    requests: Arc<AtomicUsize>,
    ranges_seen: Arc<Mutex<Vec<String>>>,
}

impl RangeServer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total requests handled (HEAD and GET).
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Range header values observed on GET requests, in arrival order.
    pub fn ranges_seen(&self) -> Vec<String> {
        self.ranges_seen.lock().unwrap().clone()
    }
}

/// Start a server with default options serving `body`.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Start a server in a background thread; it runs until the process exits.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let requests = Arc::new(AtomicUsize::new(0));
    let ranges_seen = Arc::new(Mutex::new(Vec::new()));
    let failed_once: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let server = RangeServer {
        url: format!("http://127.0.0.1:{}/data.bin", port),
        requests: Arc::clone(&requests),
        ranges_seen: Arc::clone(&ranges_seen),
    };

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = opts.clone();
            let requests = Arc::clone(&requests);
            let ranges_seen = Arc::clone(&ranges_seen);
            let failed_once = Arc::clone(&failed_once);
            thread::spawn(move || handle(stream, &body, &opts, &requests, &ranges_seen, &failed_once));
        }
    });

    server
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    requests: &AtomicUsize,
    ranges_seen: &Mutex<Vec<String>>,
    failed_once: &Mutex<HashSet<String>>,
) {
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
    requests.fetch_add(1, Ordering::Relaxed);
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        if opts.block_head {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
            return;
        }
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n",
            total
        );
        if !opts.ignore_ranges {
            response.push_str("Accept-Ranges: bytes\r\n");
        }
        if let Some(cd) = &opts.content_disposition {
            response.push_str(&format!("Content-Disposition: {}\r\n", cd));
        }
        if let Some(ct) = &opts.content_type {
            response.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        response.push_str("\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    let range_key = match range {
        Some((start, end)) => {
            let key = format!("{}-{}", start, end);
            ranges_seen.lock().unwrap().push(key.clone());
            key
        }
        None => "full".to_string(),
    };

    if opts.fail_first_get && failed_once.lock().unwrap().insert(range_key) {
        let retry_body = b"try again later";
        let response = format!(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            retry_body.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(retry_body);
        return;
    }

    let (status, content_range, slice) = match range {
        Some((start, end_incl)) if !opts.ignore_ranges => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl || start >= total {
                let _ = stream.write_all(
                    format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        total
                    )
                    .as_bytes(),
                );
                return;
            }
            let slice = &body[start as usize..=end_incl as usize];
            (
                "206 Partial Content",
                Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                slice,
            )
        }
        _ => ("200 OK", None, body),
    };

    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        slice.len()
    );
    if let Some(cr) = content_range {
        response.push_str(&format!("Content-Range: {}\r\n", cr));
    }
    if !opts.ignore_ranges {
        response.push_str("Accept-Ranges: bytes\r\n");
    }
    response.push_str("\r\n");
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }

    match opts.throttle {
        Some((chunk, delay)) if chunk > 0 => {
            for part in slice.chunks(chunk) {
                if stream.write_all(part).is_err() {
                    return;
                }
                thread::sleep(delay);
            }
        }
        _ => {
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
/// An open-ended `bytes=X-` maps the end to the last byte.
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
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
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
