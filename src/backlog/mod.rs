//! Backlog-per-instance signal for the fleet autoscaler.
//!
//! Each invocation samples the queue depth and the number of running
//! workers and publishes `depth / workers` as one metric point. If either
//! input cannot be read the run fails and nothing is published.

mod publish;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::BacklogSettings;
use crate::queue::{QueueClient, QueueError};

pub use publish::{FleetStatusCounter, HttpMetricPublisher, TracingMetricPublisher};

#[derive(Debug, Error)]
pub enum BacklogError {
    #[error("missing backlog setting: {0}")]
    MissingSetting(&'static str),
    #[error("could not read queue depth: {0}")]
    Depth(#[from] QueueError),
    #[error("could not read running worker count: {0}")]
    Workers(String),
    #[error("could not publish metric: {0}")]
    Publish(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Name/value pair attached to a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// One published data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Source of the running worker count.
#[async_trait]
pub trait WorkerCounter: Send + Sync {
    async fn running_workers(&self) -> Result<u64, BacklogError>;
}

/// Destination for metric points.
#[async_trait]
pub trait MetricPublisher: Send + Sync {
    async fn publish(&self, point: &MetricPoint) -> Result<(), BacklogError>;
}

/// Messages per worker. With no workers running the raw depth is reported
/// so the autoscaler still sees pending work.
pub fn backlog_per_instance(depth: u64, workers: u64) -> f64 {
    depth as f64 / workers.max(1) as f64
}

pub struct BacklogSignal {
    settings: BacklogSettings,
    queue: Arc<dyn QueueClient>,
    workers: Arc<dyn WorkerCounter>,
    publisher: Arc<dyn MetricPublisher>,
}

impl BacklogSignal {
    /// Fails when the fleet identity or metric name is not configured.
    pub fn new(
        settings: BacklogSettings,
        queue: Arc<dyn QueueClient>,
        workers: Arc<dyn WorkerCounter>,
        publisher: Arc<dyn MetricPublisher>,
    ) -> Result<Self, BacklogError> {
        for (name, value) in [
            ("cluster name", &settings.cluster_name),
            ("service name", &settings.service_name),
            ("metric namespace", &settings.metric_namespace),
            ("metric name", &settings.metric_name),
        ] {
            if value.trim().is_empty() {
                return Err(BacklogError::MissingSetting(name));
            }
        }
        Ok(Self {
            settings,
            queue,
            workers,
            publisher,
        })
    }

    /// Sample, compute and publish once.
    pub async fn run_once(&self) -> Result<MetricPoint, BacklogError> {
        let depth = self.queue.depth().await?;
        let workers = self.workers.running_workers().await?;
        let value = backlog_per_instance(depth, workers);

        let point = MetricPoint {
            namespace: self.settings.metric_namespace.clone(),
            metric_name: self.settings.metric_name.clone(),
            dimensions: vec![
                Dimension {
                    name: "ClusterName".to_string(),
                    value: self.settings.cluster_name.clone(),
                },
                Dimension {
                    name: "ServiceName".to_string(),
                    value: self.settings.service_name.clone(),
                },
            ],
            value,
            unit: "Count".to_string(),
            timestamp: Utc::now(),
        };
        self.publisher.publish(&point).await?;
        info!(
            "Backlog per instance {:.2} (depth={}, workers={})",
            value, depth, workers
        );
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_per_instance() {
        assert_eq!(backlog_per_instance(10, 4), 2.5);
        assert_eq!(backlog_per_instance(0, 3), 0.0);
        assert_eq!(backlog_per_instance(7, 0), 7.0);
    }

    #[test]
    fn test_dimension_wire_names() {
        let json = serde_json::to_string(&Dimension {
            name: "ClusterName".to_string(),
            value: "books".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"Name":"ClusterName","Value":"books"}"#);
    }
}
