//! Pipeline error types.

use std::time::Duration;

use thiserror::Error;

use super::merge::MergeError;
use crate::artifacts::ArtifactError;
use crate::checkpoint::CheckpointError;
use crate::render::RenderError;

/// Failure of a single task attempt. Retried, then counted toward the breaker.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limiter rejected request: {0}")]
    RateLimit(#[from] crate::rate_limit::RateLimitError),
    #[error("failed to build print request: {0}")]
    Template(#[from] askama::Error),
    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a whole conversion run.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("circuit breaker tripped after {failures} consecutive task failures")]
    CircuitBreakerTripped { failures: u32 },
    #[error("job exceeded maximum duration ({elapsed:?})")]
    JobTimeoutExceeded { elapsed: Duration },
    #[error("conversion interrupted by shutdown")]
    Interrupted,
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("failed to publish content: {0}")]
    Publish(#[from] ArtifactError),
    #[error("rendering engine unavailable: {0}")]
    Engine(#[from] RenderError),
    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ConversionError {
    /// Aborts that are decided by policy rather than infrastructure.
    pub fn is_policy_abort(&self) -> bool {
        matches!(
            self,
            Self::CircuitBreakerTripped { .. } | Self::JobTimeoutExceeded { .. }
        )
    }
}
