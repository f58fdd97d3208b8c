//! HTTP HEAD metadata probing.
//!
//! One probe per task discovers `Content-Length`, range support,
//! `Content-Disposition` and `Content-Type` before the first byte is
//! downloaded. Runs on a blocking thread; callers wrap it in
//! `spawn_blocking` and retry it with the task's policy.

mod parse;

use std::str;
use std::time::Duration;

use crate::retry::SegmentError;

/// Metadata extracted from a HEAD response.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    /// Total size in bytes, if `Content-Length` was present.
    pub content_length: Option<u64>,
    /// True if the server advertises `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// Raw `Content-Disposition` value, if any (filename hint).
    pub content_disposition: Option<String>,
    /// Raw `Content-Type` value, if any (extension fallback).
    pub content_type: Option<String>,
    /// URL after redirects; filename derivation prefers it over the
    /// original request URL.
    pub final_url: Option<String>,
}

/// Performs a HEAD request and returns parsed metadata.
///
/// Follows redirects; only the final response's headers are kept.
/// Errors map onto [`SegmentError`] so the caller's retry policy can
/// classify them like any other attempt failure.
pub fn probe(url: &str) -> Result<ProbeResult, SegmentError> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Network)?;
    easy.nobody(true).map_err(SegmentError::Network)?;
    easy.follow_location(true).map_err(SegmentError::Network)?;
    easy.max_redirections(10).map_err(SegmentError::Network)?;
    easy.connect_timeout(Duration::from_secs(15))
        .map_err(SegmentError::Network)?;
    easy.timeout(Duration::from_secs(30))
        .map_err(SegmentError::Network)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    // Redirects emit one header block each; keep only the
                    // final response by clearing on every status line.
                    if line.starts_with("HTTP/") {
                        headers.clear();
                    }
                    headers.push(line.to_string());
                }
                true
            })
            .map_err(SegmentError::Network)?;
        transfer.perform().map_err(SegmentError::Network)?;
    }

    let code = easy.response_code().map_err(SegmentError::Network)?;
    if !(200..300).contains(&code) {
        return Err(SegmentError::Http(code));
    }

    let mut result = parse::parse_headers(&headers);
    result.final_url = easy
        .effective_url()
        .ok()
        .flatten()
        .map(|u| u.to_string());
    Ok(result)
}
