//! Classify HTTP status and curl errors into retry policy error kinds.

use super::error::SegmentError;
use super::policy::ErrorKind;

/// Classify a non-success HTTP status code.
///
/// 429 and 503 count as throttling; every other non-2xx status is retryable
/// up to the policy's attempt cap.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        _ => ErrorKind::HttpStatus(code.min(u16::MAX as u32) as u16),
    }
}

/// Classify a curl transport error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_write_error()
        || e.is_partial_file()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Fatal
}

/// Classify a segment error into an ErrorKind for the retry policy.
pub fn classify(e: &SegmentError) -> ErrorKind {
    match e {
        SegmentError::Network(ce) => classify_curl_error(ce),
        SegmentError::Http(code) => classify_http_status(*code),
        SegmentError::PartialTransfer { .. } => ErrorKind::Connection,
        SegmentError::RangeNotSupported => ErrorKind::Fatal,
        SegmentError::Storage(_) => ErrorKind::Fatal,
        SegmentError::Canceled => ErrorKind::Canceled,
    }
}
