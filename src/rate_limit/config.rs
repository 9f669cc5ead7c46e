//! Token bucket configuration and types.

use std::time::Duration;

/// Default bucket capacity (points per window).
pub const DEFAULT_POINTS: u32 = 800;

/// Default refill window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the content API token bucket.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity. A full bucket allows this many points at once.
    pub points: u32,
    /// Time for an empty bucket to refill completely.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            points: DEFAULT_POINTS,
            window: DEFAULT_WINDOW,
        }
    }
}

impl RateLimitConfig {
    /// Apply `CONTENT_API_RATE_LIMIT_POINTS` / `CONTENT_API_RATE_LIMIT_WINDOW_SECS`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(points) = std::env::var("CONTENT_API_RATE_LIMIT_POINTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|p| *p > 0)
        {
            self.points = points;
        }
        if let Some(secs) = std::env::var("CONTENT_API_RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            self.window = Duration::from_secs(secs);
        }
        self
    }

    /// Points regained per second.
    pub fn refill_per_sec(&self) -> f64 {
        self.points as f64 / self.window.as_secs_f64()
    }
}

/// Snapshot of the bucket for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct BucketStats {
    pub remaining: f64,
    pub capacity: u32,
    pub total_consumed: u64,
    pub times_limited: u64,
}
