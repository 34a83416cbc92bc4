//! Rate Limit Gate
//!
//! Shared cooldown gate for upstream HTTP providers. An HTTP 429 closes the
//! gate for every caller, not just the request that tripped it, and the
//! cooldown grows exponentially across consecutive 429s up to a cap.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Raised when a call keeps getting rate limited past the retry budget
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{label} still rate limited after {attempts} attempts")]
pub struct RateLimitExceeded {
    pub label: String,
    pub attempts: u32,
}

/// Result of a single attempt against a rate limited upstream
#[derive(Debug)]
pub enum Attempt<T> {
    /// The upstream answered (successfully or with a non-429 outcome)
    Done(T),
    /// The upstream replied with HTTP 429
    RateLimited,
}

/// Cooldown and retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Cooldown after the first 429
    pub cooldown: Duration,
    /// Upper bound for the exponential cooldown
    pub max_cooldown: Duration,
    /// Retries allowed per call before giving up
    pub max_retries: u32,
}

impl RateLimitPolicy {
    pub fn new(cooldown: Duration, max_cooldown: Duration, max_retries: u32) -> Self {
        Self {
            cooldown,
            max_cooldown,
            max_retries,
        }
    }

    /// Cooldown for the n-th consecutive 429 (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.cooldown.saturating_mul(2u32.pow(attempt.min(10)));
        delay.min(self.max_cooldown).max(self.cooldown)
    }
}

#[derive(Debug, Default)]
struct GateState {
    blocked_until: Option<Instant>,
    consecutive: u32,
}

/// Gate shared by all calls to one upstream provider
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    state: Mutex<GateState>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Instant until which the gate stays closed, if any
    pub async fn blocked_until(&self) -> Option<Instant> {
        self.state
            .lock()
            .await
            .blocked_until
            .filter(|until| *until > Instant::now())
    }

    /// Run `op` through the gate, retrying on 429 after the cooldown
    ///
    /// Non-429 errors from `op` are returned immediately and do not touch the
    /// gate. Once the retry budget is spent the gate stays closed for the
    /// last cooldown so the next call (for any key) also waits.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, E>>,
        E: From<RateLimitExceeded>,
    {
        let mut retries = 0u32;
        loop {
            self.wait_until_open().await;

            match op().await? {
                Attempt::Done(value) => {
                    self.reset().await;
                    return Ok(value);
                }
                Attempt::RateLimited => {
                    let delay = self.trip().await;
                    if retries >= self.policy.max_retries {
                        warn!(label, attempts = retries + 1, "rate limit retry budget spent");
                        return Err(RateLimitExceeded {
                            label: label.to_string(),
                            attempts: retries + 1,
                        }
                        .into());
                    }
                    retries += 1;
                    warn!(label, retry = retries, cooldown = ?delay, "rate limited, cooling down");
                }
            }
        }
    }

    async fn wait_until_open(&self) {
        loop {
            let until = self.state.lock().await.blocked_until;
            match until {
                Some(until) if until > Instant::now() => {
                    debug!(wait = ?(until - Instant::now()), "rate limit gate closed");
                    sleep_until(until).await;
                }
                _ => return,
            }
        }
    }

    async fn trip(&self) -> Duration {
        let mut state = self.state.lock().await;
        let delay = self.policy.backoff_delay(state.consecutive);
        state.consecutive = state.consecutive.saturating_add(1);
        state.blocked_until = Some(Instant::now() + delay);
        delay
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.consecutive = 0;
        state.blocked_until = None;
    }
}
