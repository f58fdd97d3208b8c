//! Retry loop: run a closure until success or the policy says stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::classify;
use super::error::SegmentError;
use super::policy::{RetryDecision, RetryPolicy};

/// Longest single sleep while backing off; keeps cancellation prompt.
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Runs `f` until it succeeds or the policy gives up. Backoff sleeps are
/// sliced so a raised `cancel` flag converts the wait into
/// `SegmentError::Canceled` within one slice.
///
/// Blocking; intended for worker threads.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &AtomicBool,
    mut f: F,
) -> Result<T, SegmentError>
where
    F: FnMut() -> Result<T, SegmentError>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(SegmentError::Canceled);
        }
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(delay) => {
                        tracing::debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                        if !sleep_unless_canceled(delay, cancel) {
                            return Err(SegmentError::Canceled);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}

/// Sleep for `total`, waking early when `cancel` is raised.
/// Returns false when canceled.
fn sleep_unless_canceled(total: Duration, cancel: &AtomicBool) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let slice = remaining.min(BACKOFF_SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !cancel.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn succeeds_without_retry() {
        let cancel = AtomicBool::new(false);
        let r = run_with_retry(&RetryPolicy::for_retries(3), &cancel, || Ok::<_, SegmentError>(7));
        assert_eq!(r.unwrap(), 7);
    }

    #[test]
    fn retries_until_success_with_backoff() {
        let mut policy = RetryPolicy::for_retries(3);
        policy.base_delay = Duration::from_millis(20);
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let r = run_with_retry(&policy, &cancel, || {
            if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                Err(SegmentError::Http(503))
            } else {
                Ok(())
            }
        });
        assert!(r.is_ok());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        // 20 ms + 40 ms of backoff at minimum.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut policy = RetryPolicy::for_retries(2);
        policy.base_delay = Duration::from_millis(1);
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let r: Result<(), _> = run_with_retry(&policy, &cancel, || {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(SegmentError::Http(500))
        });
        assert!(matches!(r, Err(SegmentError::Http(500))));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn cancel_interrupts_backoff() {
        let mut policy = RetryPolicy::for_retries(1);
        policy.base_delay = Duration::from_secs(30);
        let cancel = Arc::new(AtomicBool::new(false));
        let c = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || {
            run_with_retry(&policy, &c, || Err::<(), _>(SegmentError::Http(503)))
        });
        std::thread::sleep(Duration::from_millis(100));
        cancel.store(true, Ordering::Relaxed);
        let r = handle.join().unwrap();
        assert!(matches!(r, Err(SegmentError::Canceled)));
    }

    #[test]
    fn fatal_error_returns_immediately() {
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let r: Result<(), _> = run_with_retry(&RetryPolicy::for_retries(5), &cancel, || {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(SegmentError::Storage(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        });
        assert!(matches!(r, Err(SegmentError::Storage(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
