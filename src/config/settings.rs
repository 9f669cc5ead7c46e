//! Runtime settings resolved from defaults, the config file and the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::artifacts::StorageSettings;
use crate::pipeline::{ConversionConfig, ConversionSettings};
use crate::queue::{QueueRole, QueueSettings};
use crate::rate_limit::RateLimitConfig;
use crate::render::BrowserEngineConfig;

/// Deployment tier. Only production deletes queue messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeployEnvironment {
    Production,
    Staging,
    #[default]
    Development,
}

impl DeployEnvironment {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" | "dev" => Some(Self::Development),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }

    /// Whether processed messages are acked. Elsewhere they stay for inspection.
    pub fn acks_messages(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Whether submitted jobs are published to the queue.
    pub fn enqueues_jobs(&self) -> bool {
        !matches!(self, Self::Development)
    }
}

/// Fleet identity and metric destination for the backlog signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacklogSettings {
    pub cluster_name: String,
    pub service_name: String,
    /// Endpoint returning `{"runningCount": n}` for the service.
    pub status_url: Option<String>,
    pub metric_namespace: String,
    pub metric_name: String,
    /// Endpoint receiving metric points. Logged only when unset.
    pub metric_endpoint: Option<String>,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: DeployEnvironment,
    /// Scratch root for conversions (`TMP_OUT_DIR`).
    pub work_dir: PathBuf,
    /// Job records.
    pub data_dir: PathBuf,
    /// Content tree snapshots served by the snapshot source.
    pub content_dir: PathBuf,
    /// `None` or `memory://` = in-process queue, `amqp://...` = RabbitMQ.
    pub broker_url: Option<String>,
    pub queue: QueueSettings,
    pub rate_limit: RateLimitConfig,
    pub browser: BrowserEngineConfig,
    pub conversion: ConversionSettings,
    /// Where finished outputs are published.
    pub storage: StorageSettings,
    pub backlog: BacklogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shapeshift");

        Self {
            environment: DeployEnvironment::default(),
            work_dir: PathBuf::from("./.tmp"),
            content_dir: data_dir.join("content"),
            data_dir,
            broker_url: None,
            queue: QueueSettings::default(),
            rate_limit: RateLimitConfig::default(),
            browser: BrowserEngineConfig::default(),
            conversion: ConversionSettings::default(),
            storage: StorageSettings::default(),
            backlog: BacklogSettings {
                metric_namespace: "Shapeshift".to_string(),
                metric_name: "BacklogPerInstance".to_string(),
                ..Default::default()
            },
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_string(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

impl Settings {
    /// Apply environment variables on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(env) = env_string("SHAPESHIFT_ENV").and_then(|v| DeployEnvironment::from_str(&v)) {
            self.environment = env;
        }
        if let Some(dir) = env_string("TMP_OUT_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("SHAPESHIFT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("SHAPESHIFT_CONTENT_DIR") {
            self.content_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_string("BROKER_URL") {
            self.broker_url = Some(url);
        }
        if let Some(name) = env_string("QUEUE_NAME") {
            self.queue.standard_queue = name;
        }
        if let Some(name) = env_string("HIGH_PRIORITY_QUEUE_NAME") {
            self.queue.high_priority_queue = name;
        }
        if let Some(high) = env_flag("IS_HIGH_PRIORITY_PROCESSOR") {
            self.queue.role = if high {
                QueueRole::HighPriority
            } else {
                QueueRole::Standard
            };
        }
        if let Some(interruptible) = env_flag("INTERRUPTIBLE_WORKER") {
            self.queue.interruptible = interruptible;
        }
        if let Some(local) = env_flag("USE_LOCAL_STORAGE") {
            self.storage.use_local_storage = local;
        }
        for (name, slot) in [
            ("BUCKET", &mut self.storage.bucket),
            ("AWS_REGION", &mut self.storage.region),
            ("S3_ENDPOINT_URL", &mut self.storage.endpoint_url),
        ] {
            if let Some(value) = env_string(name) {
                *slot = Some(value);
            }
        }
        self.rate_limit = self.rate_limit.with_env_overrides();
        self.browser = self.browser.with_env_overrides();

        let backlog = &mut self.backlog;
        for (name, slot) in [
            ("FLEET_CLUSTER_NAME", &mut backlog.cluster_name),
            ("FLEET_SERVICE_NAME", &mut backlog.service_name),
            ("METRIC_NAMESPACE", &mut backlog.metric_namespace),
            ("METRIC_NAME", &mut backlog.metric_name),
        ] {
            if let Some(value) = env_string(name) {
                *slot = value;
            }
        }
        if let Some(url) = env_string("FLEET_STATUS_URL") {
            backlog.status_url = Some(url);
        }
        if let Some(url) = env_string("METRIC_ENDPOINT") {
            backlog.metric_endpoint = Some(url);
        }
        self
    }

    /// Pipeline configuration derived from these settings.
    pub fn conversion_config(&self) -> ConversionConfig {
        let mut config = ConversionConfig {
            work_root: self.work_dir.clone(),
            ..Default::default()
        };
        self.conversion.apply(&mut config);
        config
    }

    /// Time to wait before polling again after a receive error.
    pub fn receive_error_backoff(&self) -> Duration {
        Duration::from_secs(5)
    }
}
