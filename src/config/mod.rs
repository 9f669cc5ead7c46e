//! Configuration management using the prefer crate.
//!
//! Settings start from defaults, then the config file (discovered by
//! `prefer` as `shapeshift.{toml,yaml,json}` unless a path is given), then
//! environment variables. Later sources win.

mod settings;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::pipeline::ConversionSettings;

pub use settings::{BacklogSettings, DeployEnvironment, Settings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("unknown environment {0:?} (expected production, staging or development)")]
    UnknownEnvironment(String),
}

/// Configuration file structure. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Option<String>,
    pub work_dir: Option<String>,
    pub data_dir: Option<String>,
    pub content_dir: Option<String>,
    pub broker_url: Option<String>,
    pub queue_name: Option<String>,
    pub high_priority_queue_name: Option<String>,
    pub high_priority_processor: Option<bool>,
    pub interruptible: Option<bool>,
    pub rate_limit_points: Option<u32>,
    pub rate_limit_window_secs: Option<u64>,
    pub browser_url: Option<String>,
    pub conversion: ConversionSettings,
    pub use_local_storage: Option<bool>,
    pub bucket: Option<String>,
    pub aws_region: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub cluster_name: Option<String>,
    pub service_name: Option<String>,
    pub fleet_status_url: Option<String>,
    pub metric_namespace: Option<String>,
    pub metric_name: Option<String>,
    pub metric_endpoint: Option<String>,
    /// File this config was read from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load the config file. `None` when there is none.
    pub async fn discover() -> Result<Option<Self>, ConfigError> {
        match prefer::load("shapeshift").await {
            Ok(found) => match found.source_path() {
                Some(path) => Self::load_from_path(path).await.map(Some),
                None => Ok(None),
            },
            Err(_) => {
                debug!("No config file found, using defaults");
                Ok(None)
            }
        }
    }

    /// Load from an explicit path, choosing the format by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let parse_error = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
        };
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, used for relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configured values to `settings`.
    pub fn apply_to_settings(
        &self,
        settings: &mut Settings,
        base_dir: &Path,
    ) -> Result<(), ConfigError> {
        if let Some(env) = &self.environment {
            settings.environment = DeployEnvironment::from_str(env)
                .ok_or_else(|| ConfigError::UnknownEnvironment(env.clone()))?;
        }
        if let Some(dir) = &self.work_dir {
            settings.work_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(dir) = &self.data_dir {
            settings.data_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(dir) = &self.content_dir {
            settings.content_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(url) = &self.broker_url {
            settings.broker_url = Some(url.clone());
        }
        if let Some(name) = &self.queue_name {
            settings.queue.standard_queue = name.clone();
        }
        if let Some(name) = &self.high_priority_queue_name {
            settings.queue.high_priority_queue = name.clone();
        }
        if let Some(high) = self.high_priority_processor {
            settings.queue.role = if high {
                crate::queue::QueueRole::HighPriority
            } else {
                crate::queue::QueueRole::Standard
            };
        }
        if let Some(interruptible) = self.interruptible {
            settings.queue.interruptible = interruptible;
        }
        if let Some(points) = self.rate_limit_points.filter(|p| *p > 0) {
            settings.rate_limit.points = points;
        }
        if let Some(secs) = self.rate_limit_window_secs.filter(|s| *s > 0) {
            settings.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(url) = &self.browser_url {
            settings.browser.remote_url = Some(url.clone());
        }
        settings.conversion = self.conversion.clone();
        if let Some(local) = self.use_local_storage {
            settings.storage.use_local_storage = local;
        }
        for (value, slot) in [
            (&self.bucket, &mut settings.storage.bucket),
            (&self.aws_region, &mut settings.storage.region),
            (&self.s3_endpoint_url, &mut settings.storage.endpoint_url),
        ] {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        let backlog = &mut settings.backlog;
        for (value, slot) in [
            (&self.cluster_name, &mut backlog.cluster_name),
            (&self.service_name, &mut backlog.service_name),
            (&self.metric_namespace, &mut backlog.metric_namespace),
            (&self.metric_name, &mut backlog.metric_name),
        ] {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        if self.fleet_status_url.is_some() {
            backlog.status_url = self.fleet_status_url.clone();
        }
        if self.metric_endpoint.is_some() {
            backlog.metric_endpoint = self.metric_endpoint.clone();
        }
        Ok(())
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Resolve relative paths from the current directory instead of the config file's.
    pub use_cwd: bool,
}

/// Build settings from defaults, the config file and the environment.
pub async fn load_settings(options: LoadOptions) -> Result<Settings, ConfigError> {
    let config = match &options.config_path {
        Some(path) => Some(Config::load_from_path(path).await?),
        None => Config::discover().await?,
    };

    let mut settings = Settings::default();
    if let Some(config) = config {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let base_dir = if options.use_cwd {
            cwd
        } else {
            config.base_dir().unwrap_or(cwd)
        };
        debug!("Applying config from {:?}", config.source_path);
        config.apply_to_settings(&mut settings, &base_dir)?;
    }
    Ok(settings.with_env_overrides())
}
