//! Retry/backoff and circuit-breaker policies for the task loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Exponential backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// All attempts failed; carries the final error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= attempts => {
                    warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Halts a job after too many consecutive task failures.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker {
    pub threshold: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn is_open(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.threshold
    }
}
