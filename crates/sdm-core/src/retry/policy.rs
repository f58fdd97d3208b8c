use std::time::Duration;

/// High-level classification of an attempt failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, early close).
    Connection,
    /// Any other non-success HTTP status. Retryable per policy.
    HttpStatus(u16),
    /// Not worth retrying: storage failure or a protocol mismatch the
    /// caller handles out of band (e.g. missing range support).
    Fatal,
    /// User-initiated stop. Never retried, never reported as a failure.
    Canceled,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff: 1 s, 2 s, 4 s, ... capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy for a task configured with `max_retries` retries after the
    /// initial attempt.
    pub fn for_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed
    /// with `kind`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::Fatal | ErrorKind::Canceled => RetryDecision::NoRetry,
            ErrorKind::Timeout
            | ErrorKind::Throttled
            | ErrorKind::Connection
            | ErrorKind::HttpStatus(_) => {
                let exp = 1u32 << attempt.saturating_sub(1).min(16);
                let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}
