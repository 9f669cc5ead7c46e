//! Conversion pipeline tuning.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::{CircuitBreaker, RetryPolicy};
use crate::render::{Viewport, DEFAULT_RENDER_TIMEOUT};

/// Sub-resource URL fragments blocked while printing pages.
pub const DEFAULT_BLOCKED_URL_FRAGMENTS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "hotjar.com",
    "hypothes.is",
];

/// Settings for one pipeline instance.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Root of the scratch tree (`TMP_OUT_DIR`).
    pub work_root: PathBuf,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreaker,
    /// Wall-clock ceiling for a whole job.
    pub max_job_duration: Duration,
    /// Ceiling for a single render attempt.
    pub render_timeout: Duration,
    /// Replace the rendering engine after this many tasks.
    pub recycle_after: u32,
    pub viewport: Viewport,
    pub blocked_url_fragments: Vec<String>,
    /// Info dictionary `Producer` of the merged document.
    pub producer: String,
    /// Info dictionary `Creator` of the merged document.
    pub creator: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("./.tmp"),
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::default(),
            max_job_duration: Duration::from_secs(4 * 60 * 60),
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            recycle_after: 50,
            viewport: Viewport::default(),
            blocked_url_fragments: DEFAULT_BLOCKED_URL_FRAGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            producer: "LibreTexts Shapeshift".to_string(),
            creator: "LibreTexts (libretexts.org)".to_string(),
        }
    }
}

/// File-configurable subset of [`ConversionConfig`]. All fields optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    pub max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_multiplier: Option<f64>,
    pub retry_max_delay_ms: Option<u64>,
    pub breaker_threshold: Option<u32>,
    pub max_job_duration_secs: Option<u64>,
    pub render_timeout_secs: Option<u64>,
    pub recycle_after: Option<u32>,
    pub blocked_url_fragments: Option<Vec<String>>,
}

impl ConversionSettings {
    pub fn apply(&self, config: &mut ConversionConfig) {
        if let Some(v) = self.max_attempts {
            config.retry.max_attempts = v.max(1);
        }
        if let Some(v) = self.retry_base_delay_ms {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.retry_multiplier {
            config.retry.multiplier = v;
        }
        if let Some(v) = self.retry_max_delay_ms {
            config.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.breaker_threshold {
            config.breaker = CircuitBreaker::new(v.max(1));
        }
        if let Some(v) = self.max_job_duration_secs {
            config.max_job_duration = Duration::from_secs(v);
        }
        if let Some(v) = self.render_timeout_secs {
            config.render_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.recycle_after {
            config.recycle_after = v.max(1);
        }
        if let Some(v) = &self.blocked_url_fragments {
            config.blocked_url_fragments = v.clone();
        }
    }
}
