//! Shared byte-rate pacing for all transfers of one queue.
//!
//! A token bucket refilled on every acquire. Workers call [`RateLimiter::acquire`]
//! once per receive buffer from their blocking transfer threads; the call sleeps
//! in short slices so a raised cancel flag is observed within tens of
//! milliseconds. Queues publish the limiter through [`SharedLimiter`], a
//! replaceable slot, so changing the speed limit takes effect for transfers
//! already in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Longest single sleep inside `acquire`; bounds cancellation latency.
const ACQUIRE_SLICE: Duration = Duration::from_millis(50);

/// Token bucket enforcing an aggregate bytes-per-second ceiling.
///
/// A rate of 0 disables pacing entirely. Burst capacity is one second's
/// worth of tokens; the bucket may run into debt so that acquires larger
/// than the capacity still pace correctly at small rates.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

struct TokenBucket {
    /// Bytes per second; 0 = unlimited.
    rate: u64,
    /// Upper bound on banked tokens.
    capacity: i64,
    /// May go negative: an oversized acquire leaves debt that refills pay off.
    tokens: i64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self) {
        if self.rate == 0 {
            self.tokens = self.capacity;
            return;
        }
        let now = Instant::now();
        let earned = (now.duration_since(self.last_refill).as_secs_f64() * self.rate as f64) as i64;
        if earned > 0 {
            self.tokens = (self.tokens + earned).min(self.capacity);
            self.last_refill = now;
        }
    }
}

impl RateLimiter {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        let capacity = Self::capacity_for(rate_bytes_per_sec);
        Self {
            bucket: Mutex::new(TokenBucket {
                rate: rate_bytes_per_sec,
                capacity,
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn capacity_for(rate: u64) -> i64 {
        if rate == 0 {
            i64::MAX
        } else {
            rate.min(i64::MAX as u64) as i64
        }
    }

    pub fn rate(&self) -> u64 {
        self.bucket.lock().unwrap().rate
    }

    /// Change the rate. Tokens already banked are clamped to the new capacity.
    pub fn set_rate(&self, rate_bytes_per_sec: u64) {
        let mut bucket = self.bucket.lock().unwrap();
        bucket.refill();
        bucket.rate = rate_bytes_per_sec;
        bucket.capacity = Self::capacity_for(rate_bytes_per_sec);
        bucket.tokens = bucket.tokens.min(bucket.capacity);
    }

    /// Block until `amount` bytes are permitted, or until `cancel` is raised.
    ///
    /// Returns `true` when the tokens were granted and `false` on cancellation.
    /// Callers must not proceed with the read when this returns `false`.
    pub fn acquire(&self, amount: u64, cancel: &AtomicBool) -> bool {
        if amount == 0 {
            return true;
        }
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let wait = {
                let mut bucket = self.bucket.lock().unwrap();
                if bucket.rate == 0 {
                    return true;
                }
                bucket.refill();
                if bucket.tokens > 0 {
                    bucket.tokens -= amount.min(i64::MAX as u64) as i64;
                    return true;
                }
                let deficit = bucket.tokens.unsigned_abs() + 1;
                Duration::from_secs_f64(deficit as f64 / bucket.rate as f64)
            };
            std::thread::sleep(wait.min(ACQUIRE_SLICE));
        }
    }
}

/// Replaceable limiter slot shared by every task of a queue.
///
/// Tasks hold an `Arc<SharedLimiter>` for their whole life; the queue swaps
/// the inner limiter on `set_speed_limit`, and workers pick up the new one
/// on their next buffer acquire.
pub struct SharedLimiter {
    slot: RwLock<Arc<RateLimiter>>,
}

impl SharedLimiter {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            slot: RwLock::new(Arc::new(RateLimiter::new(rate_bytes_per_sec))),
        }
    }

    /// Swap in a fresh limiter with the given rate.
    pub fn replace(&self, rate_bytes_per_sec: u64) {
        *self.slot.write().unwrap() = Arc::new(RateLimiter::new(rate_bytes_per_sec));
    }

    /// Snapshot of the live limiter.
    pub fn current(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.slot.read().unwrap())
    }

    pub fn rate(&self) -> u64 {
        self.current().rate()
    }

    /// Acquire against the limiter that is live right now.
    pub fn acquire(&self, amount: u64, cancel: &AtomicBool) -> bool {
        self.current().acquire(amount, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn unlimited_never_blocks() {
        let limiter = RateLimiter::new(0);
        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.acquire(1 << 20, &cancel));
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn zero_amount_is_free() {
        let limiter = RateLimiter::new(1);
        let cancel = AtomicBool::new(false);
        assert!(limiter.acquire(0, &cancel));
    }

    #[test]
    fn paces_after_burst() {
        // 10 KiB/s with a full initial bucket: the first 10 KiB are free,
        // the next 5 KiB must take roughly half a second.
        let limiter = RateLimiter::new(10 * 1024);
        let cancel = AtomicBool::new(false);
        assert!(limiter.acquire(10 * 1024, &cancel));
        let start = Instant::now();
        assert!(limiter.acquire(5 * 1024, &cancel));
        assert!(limiter.acquire(1, &cancel));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(350), "elapsed {elapsed:?}");
    }

    #[test]
    fn cancel_unblocks_acquire() {
        let limiter = Arc::new(RateLimiter::new(1));
        let cancel = Arc::new(AtomicBool::new(false));
        // Drain the one-token bucket so the next acquire must wait.
        assert!(limiter.acquire(1 << 20, &AtomicBool::new(false)));

        let l = Arc::clone(&limiter);
        let c = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || l.acquire(1 << 20, &c));
        std::thread::sleep(Duration::from_millis(100));
        cancel.store(true, Ordering::Relaxed);
        let granted = handle.join().unwrap();
        assert!(!granted);
    }

    #[test]
    fn set_rate_applies_to_later_acquires() {
        let limiter = RateLimiter::new(100);
        limiter.set_rate(0);
        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        assert!(limiter.acquire(1 << 24, &cancel));
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.rate(), 0);
    }

    #[test]
    fn shared_limiter_replacement_is_seen_by_next_acquire() {
        let shared = SharedLimiter::new(1);
        let before = shared.current();
        shared.replace(0);
        let after = shared.current();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(shared.rate(), 0);

        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        assert!(shared.acquire(1 << 24, &cancel));
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
