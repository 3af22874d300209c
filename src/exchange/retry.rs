//! Bounded retry policy.
//!
//! A failed attempt is retried only if it is transient (network, 5xx, 429 or
//! 418). Rate-limit responses that name a `Retry-After` are honoured exactly;
//! everything else backs off exponentially: 1, 2, 4 … units.

use std::time::Duration;

use super::ApiError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff unit.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// One backoff "time unit". `Retry-After: N` waits `N` units.
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

/// What to do after attempt number `attempt` (1-based) failed.
#[derive(Debug, PartialEq)]
pub enum RetryDecision {
    /// Wait, then try again.
    RetryAfter(Duration),
    /// Terminal error; surface it as-is.
    GiveUp,
    /// Transient error but the budget is spent.
    Exhausted,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, unit: Duration) -> Self {
        Self { max_retries, unit }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before the retry that follows failed attempt `attempt`.
    pub fn delay(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(units) => self.unit.saturating_mul(units.min(u64::from(u32::MAX)) as u32),
            None => {
                let exp = attempt.saturating_sub(1).min(16);
                self.unit.saturating_mul(1u32 << exp)
            }
        }
    }

    pub fn decide(&self, attempt: u32, error: &ApiError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempt > self.max_retries {
            return RetryDecision::Exhausted;
        }
        RetryDecision::RetryAfter(self.delay(attempt, error.retry_after()))
    }
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// HTTP-date forms are ignored (the caller falls back to exponential
/// backoff).
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
