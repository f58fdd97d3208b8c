//! One blocking worker per segment: ranged GET, paced positional writes.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::limiter::SharedLimiter;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};
use crate::segmenter::Segment;
use crate::storage::OutputFile;

/// Everything a segment worker needs, detached from the task's locks.
pub(crate) struct SegmentJob {
    pub url: String,
    pub index: usize,
    pub segment: Segment,
    /// False when Content-Length was absent; the segment is then open-ended.
    pub total_known: bool,
    /// False forces plain GETs (no Range header) for the fallback path.
    pub use_ranges: bool,
    pub file: OutputFile,
    pub limiter: Arc<SharedLimiter>,
    pub progress: Arc<Vec<AtomicU64>>,
    pub cancel: Arc<AtomicBool>,
    pub policy: RetryPolicy,
    pub buffer_size: usize,
}

impl SegmentJob {
    /// Download the segment's remainder, retrying transient failures.
    /// Each attempt resumes from the current progress counter, so a retry
    /// re-requests only the bytes this segment still misses.
    pub(crate) fn run(&self) -> Result<(), SegmentError> {
        run_with_retry(&self.policy, &self.cancel, || self.attempt())
    }

    fn attempt(&self) -> Result<(), SegmentError> {
        let already = self.progress[self.index].load(Ordering::Relaxed);
        if self.total_known && self.segment.start + already >= self.segment.end {
            return Ok(());
        }

        let range: Option<String> = if self.use_ranges {
            if self.total_known {
                Some(self.segment.range_value_from(already))
            } else if already > 0 {
                // Unknown size: resume with an open-ended range.
                Some(format!("{}-", already))
            } else {
                None
            }
        } else {
            None
        };

        if range.is_none() && already > 0 {
            // Plain GET replays the body from byte zero; the counter
            // restarts with it so progress stays truthful.
            self.progress[self.index].store(0, Ordering::Relaxed);
        }
        let write_base = match &range {
            Some(_) => self.segment.start + already,
            None => 0,
        };
        // Byte budget for this attempt; None while the size is unknown.
        let expected: Option<u64> = if self.total_known {
            Some(self.segment.end - write_base)
        } else {
            None
        };

        let mut easy = curl::easy::Easy::new();
        easy.url(&self.url).map_err(SegmentError::Network)?;
        easy.follow_location(true).map_err(SegmentError::Network)?;
        easy.max_redirections(10).map_err(SegmentError::Network)?;
        easy.connect_timeout(Duration::from_secs(30))
            .map_err(SegmentError::Network)?;
        // Low-speed abort instead of a tight wall-clock timeout: a large
        // segment on a slow link must not be killed while making progress.
        easy.low_speed_limit(1024).map_err(SegmentError::Network)?;
        easy.low_speed_time(Duration::from_secs(60))
            .map_err(SegmentError::Network)?;
        easy.buffer_size(self.buffer_size)
            .map_err(SegmentError::Network)?;
        if let Some(value) = &range {
            easy.range(value).map_err(SegmentError::Network)?;
        }
        let sent_range = range.is_some();

        let status = Cell::new(0u32);
        let received = Cell::new(0u64);
        let canceled = Cell::new(false);
        let range_ignored = Cell::new(false);
        let storage_error: RefCell<Option<std::io::Error>> = RefCell::new(None);

        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Ok(s) = std::str::from_utf8(data) {
                        if let Some(code) = parse_status_line(s.trim()) {
                            status.set(code);
                        }
                    }
                    true
                })
                .map_err(SegmentError::Network)?;
            transfer
                .write_function(|data| {
                    if self.cancel.load(Ordering::Relaxed) {
                        canceled.set(true);
                        return Ok(0);
                    }
                    let code = status.get();
                    if !(200..300).contains(&code) {
                        // Error bodies (a 503 page, say) must never reach
                        // the output file; swallow and fail on the code.
                        return Ok(data.len());
                    }
                    if code == 200 && sent_range && write_base > 0 {
                        range_ignored.set(true);
                        return Ok(0);
                    }
                    let mut len = data.len() as u64;
                    if let Some(budget) = expected {
                        // A write past the segment's end is impossible even
                        // if the server over-delivers.
                        let room = budget.saturating_sub(received.get());
                        if room == 0 {
                            return Ok(data.len());
                        }
                        len = len.min(room);
                    }
                    if !self.limiter.acquire(len, &self.cancel) {
                        canceled.set(true);
                        return Ok(0);
                    }
                    if let Err(e) = self.file.write_at(write_base + received.get(), &data[..len as usize]) {
                        storage_error.borrow_mut().replace(e);
                        return Ok(0);
                    }
                    received.set(received.get() + len);
                    self.progress[self.index].fetch_add(len, Ordering::Relaxed);
                    Ok(data.len())
                })
                .map_err(SegmentError::Network)?;

            if let Err(e) = transfer.perform() {
                if canceled.get() {
                    return Err(SegmentError::Canceled);
                }
                if let Some(io_err) = storage_error.borrow_mut().take() {
                    return Err(SegmentError::Storage(io_err));
                }
                if range_ignored.get() {
                    return Err(SegmentError::RangeNotSupported);
                }
                return Err(SegmentError::Network(e));
            }
        }

        let code = easy.response_code().map_err(SegmentError::Network)?;
        if !(200..300).contains(&code) {
            return Err(SegmentError::Http(code));
        }
        if sent_range && code == 200 && write_base > 0 {
            // Empty-body 200 to a ranged request: no callback ever fired.
            return Err(SegmentError::RangeNotSupported);
        }

        if let Some(budget) = expected {
            let got = received.get();
            if got < budget {
                return Err(SegmentError::PartialTransfer {
                    expected: budget,
                    received: got,
                });
            }
        }
        Ok(())
    }
}

/// Extract the status code from an `HTTP/<ver> <code> <reason>` line.
fn parse_status_line(line: &str) -> Option<u32> {
    line.strip_prefix("HTTP/")?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_line_variants() {
        assert_eq!(parse_status_line("HTTP/1.1 206 Partial Content"), Some(206));
        assert_eq!(parse_status_line("HTTP/1.1 200 OK"), Some(200));
        assert_eq!(parse_status_line("HTTP/2 503"), Some(503));
        assert_eq!(parse_status_line("Content-Length: 5"), None);
        assert_eq!(parse_status_line(""), None);
    }
}
