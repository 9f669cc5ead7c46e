//! Browser engine configuration.

use serde::{Deserialize, Serialize};

/// How to obtain a Chromium instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Explicit Chrome/Chromium executable. Searched for when unset.
    #[serde(default)]
    pub executable: Option<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

fn default_headless() -> bool {
    true
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply `BROWSER_URL`, `BROWSER_HEADLESS` and `CHROME_PATH`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("BROWSER_URL") {
            if !url.is_empty() {
                self.remote_url = Some(url);
            }
        }
        if let Ok(value) = std::env::var("BROWSER_HEADLESS") {
            self.headless = !matches!(value.to_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Ok(path) = std::env::var("CHROME_PATH") {
            if !path.is_empty() {
                self.executable = Some(path);
            }
        }
        self
    }
}
