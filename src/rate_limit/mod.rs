//! Token bucket guarding calls to the upstream content API.
//!
//! One limiter is shared by every caller in the process (page renders,
//! concurrent cover renders, structure discovery). Cloning shares the bucket.
//! The bucket refills linearly, so sustained demand is held to `points`
//! per `window` while short bursts up to capacity go through immediately.

mod config;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub use config::{BucketStats, RateLimitConfig, DEFAULT_POINTS, DEFAULT_WINDOW};

/// Errors from the token bucket.
#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    /// Not enough points right now; retry after `wait`.
    #[error("rate limited, retry in {wait:?}")]
    Limited { wait: Duration },
    /// The request can never be satisfied by this bucket.
    #[error("requested {requested} points but bucket capacity is {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u32 },
}

#[derive(Debug)]
struct Bucket {
    remaining: f64,
    last_refill: Instant,
    total_consumed: u64,
    times_limited: u64,
}

impl Bucket {
    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.remaining = (self.remaining + elapsed * config.refill_per_sec()).min(config.points as f64);
        self.last_refill = now;
    }
}

/// Process-wide token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with default capacity (800 points per minute).
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a limiter with a custom bucket. Starts full.
    pub fn with_config(config: RateLimitConfig) -> Self {
        let bucket = Bucket {
            remaining: config.points as f64,
            last_refill: Instant::now(),
            total_consumed: 0,
            times_limited: 0,
        };
        Self {
            config,
            bucket: Arc::new(Mutex::new(bucket)),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take `points` from the bucket, or report how long until they are available.
    pub async fn consume(&self, points: u32) -> Result<(), RateLimitError> {
        if points > self.config.points {
            return Err(RateLimitError::ExceedsCapacity {
                requested: points,
                capacity: self.config.points,
            });
        }

        let mut bucket = self.bucket.lock().await;
        bucket.refill(&self.config, Instant::now());

        let wanted = points as f64;
        if bucket.remaining >= wanted {
            bucket.remaining -= wanted;
            bucket.total_consumed += points as u64;
            return Ok(());
        }

        bucket.times_limited += 1;
        let deficit = wanted - bucket.remaining;
        let wait = Duration::from_secs_f64(deficit / self.config.refill_per_sec());
        // Round up to whole milliseconds so a waiter never wakes just short of the refill.
        let wait = Duration::from_millis(wait.as_millis() as u64 + 1);
        Err(RateLimitError::Limited { wait })
    }

    /// Block until `points` could be consumed. Never gives up.
    pub async fn wait_until_available(&self, points: u32) -> Result<(), RateLimitError> {
        loop {
            match self.consume(points).await {
                Ok(()) => return Ok(()),
                Err(RateLimitError::Limited { wait }) => {
                    debug!("Content API rate limited: waiting {:?} for {} points", wait, points);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn stats(&self) -> BucketStats {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(&self.config, Instant::now());
        BucketStats {
            remaining: bucket.remaining,
            capacity: self.config.points,
            total_consumed: bucket.total_consumed,
            times_limited: bucket.times_limited,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            bucket: self.bucket.clone(),
        }
    }
}
