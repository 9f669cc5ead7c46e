//! HTTP-backed worker counts and metric sinks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{BacklogError, MetricPoint, MetricPublisher, WorkerCounter};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Result<reqwest::Client, BacklogError> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("shapeshift/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    running_count: Option<u64>,
}

/// Reads `{"runningCount": n}` from a fleet status endpoint.
pub struct FleetStatusCounter {
    client: reqwest::Client,
    url: String,
}

impl FleetStatusCounter {
    pub fn new(url: impl Into<String>) -> Result<Self, BacklogError> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl WorkerCounter for FleetStatusCounter {
    async fn running_workers(&self) -> Result<u64, BacklogError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(BacklogError::Workers(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        let status: ServiceStatus = response.json().await?;
        status
            .running_count
            .ok_or_else(|| BacklogError::Workers("response has no runningCount".to_string()))
    }
}

/// POSTs each point as JSON.
pub struct HttpMetricPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMetricPublisher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BacklogError> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetricPublisher for HttpMetricPublisher {
    async fn publish(&self, point: &MetricPoint) -> Result<(), BacklogError> {
        let response = self.client.post(&self.endpoint).json(point).send().await?;
        if !response.status().is_success() {
            return Err(BacklogError::Publish(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs points instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct TracingMetricPublisher;

#[async_trait]
impl MetricPublisher for TracingMetricPublisher {
    async fn publish(&self, point: &MetricPoint) -> Result<(), BacklogError> {
        info!(
            "metric {}/{} = {} {} {:?}",
            point.namespace, point.metric_name, point.value, point.unit, point.dimensions
        );
        Ok(())
    }
}
