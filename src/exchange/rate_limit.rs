//! Token-bucket admission control.
//!
//! Every outbound attempt takes one token. Tokens refill continuously at the
//! sustained rate up to the burst capacity. A caller that finds the bucket
//! empty sleeps until the next token is due, racing the sleep against the
//! shutdown signal.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::shutdown::Shutdown;

#[derive(Debug, thiserror::Error)]
#[error("rate limiter wait cancelled by shutdown")]
pub struct AcquireCancelled;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket refilling at `rate_per_sec` tokens/second holding at most
    /// `burst` tokens. It starts full.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate_per_sec: rate_per_sec.max(f64::MIN_POSITIVE),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting for it if necessary.
    pub async fn acquire(&self, shutdown: &Shutdown) -> Result<(), AcquireCancelled> {
        loop {
            if shutdown.is_triggered() {
                return Err(AcquireCancelled);
            }

            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                Duration::try_from_secs_f64((1.0 - state.tokens) / self.rate_per_sec)
                    .unwrap_or(Duration::MAX)
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => return Err(AcquireCancelled),
            }
        }
    }

    /// Tokens currently available (after refilling).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
