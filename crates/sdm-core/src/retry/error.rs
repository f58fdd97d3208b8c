//! Segment download error type for retry classification.

use std::fmt;

/// Error produced by one download attempt (probe or segment transfer).
/// Kept as a dedicated type so the retry policy can classify it before it
/// is folded into anyhow at the task boundary.
#[derive(Debug)]
pub enum SegmentError {
    /// Transport-level failure reported by libcurl (timeout, DNS, reset...).
    Network(curl::Error),
    /// Non-success HTTP status.
    Http(u32),
    /// Server answered 200 to a ranged request: ranges are not honored and
    /// the task must fall back to a single streaming segment.
    RangeNotSupported,
    /// Transfer ended cleanly but short of the segment's byte count
    /// (server closed early). Retried from the current offset.
    PartialTransfer { expected: u64, received: u64 },
    /// File open/write/sync failed. Fatal to the current run.
    Storage(std::io::Error),
    /// The run's cancel flag was raised (pause, cancel, or queue stop).
    Canceled,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Network(e) => write!(f, "network: {}", e),
            SegmentError::Http(code) => write!(f, "HTTP {}", code),
            SegmentError::RangeNotSupported => write!(f, "server ignored Range request"),
            SegmentError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {expected} bytes, got {received}")
            }
            SegmentError::Storage(e) => write!(f, "storage: {}", e),
            SegmentError::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::Network(e) => Some(e),
            SegmentError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
