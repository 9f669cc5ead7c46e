//! Service wiring shared by the commands.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::artifacts;
use crate::checkpoint::FileCheckpointStore;
use crate::config::Settings;
use crate::content::{ContentSource, RateLimitedSource, SnapshotContentSource};
use crate::jobs::{FileJobStore, JobService, JobStore};
use crate::pipeline::{ConversionPipeline, LopdfMerger};
use crate::queue::{self, QueueClient};
use crate::rate_limit::RateLimiter;
use crate::render::EngineFactory;

/// Services built from [`Settings`].
pub struct AppContext {
    pub settings: Settings,
    pub rate_limiter: RateLimiter,
    pub queue: Arc<dyn QueueClient>,
    pub store: Arc<dyn JobStore>,
    pub content: Arc<dyn ContentSource>,
    pub pipeline: Arc<ConversionPipeline>,
}

impl AppContext {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let rate_limiter = RateLimiter::with_config(settings.rate_limit.clone());
        let queue = queue::connect(settings.broker_url.as_deref(), settings.queue.clone()).await?;
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::new(&settings.data_dir));
        let content: Arc<dyn ContentSource> = Arc::new(RateLimitedSource::new(
            Arc::new(SnapshotContentSource::new(&settings.content_dir)),
            rate_limiter.clone(),
        ));
        let config = settings.conversion_config();
        let artifact_store = artifacts::connect(&settings.storage, &settings.work_dir).await?;
        let pipeline = Arc::new(
            ConversionPipeline::new(
                config,
                rate_limiter.clone(),
                engine_factory(&settings),
                Arc::new(FileCheckpointStore::new(&settings.work_dir)),
                Arc::new(LopdfMerger),
            )
            .with_artifact_store(artifact_store),
        );

        info!(
            "Environment {}, scratch {}, jobs {}",
            settings.environment.as_str(),
            settings.work_dir.display(),
            settings.data_dir.display()
        );

        Ok(Self {
            settings,
            rate_limiter,
            queue,
            store,
            content,
            pipeline,
        })
    }

    pub fn job_service(&self, shutdown: Option<watch::Receiver<bool>>) -> JobService {
        let service = JobService::new(
            self.store.clone(),
            self.queue.clone(),
            self.content.clone(),
            self.pipeline.clone(),
            self.settings.environment,
        );
        match shutdown {
            Some(rx) => service.with_shutdown(rx),
            None => service,
        }
    }
}

#[cfg(feature = "browser")]
fn engine_factory(settings: &Settings) -> Arc<dyn EngineFactory> {
    Arc::new(crate::render::ChromiumEngineFactory::new(
        settings.browser.clone(),
    ))
}

#[cfg(not(feature = "browser"))]
fn engine_factory(_settings: &Settings) -> Arc<dyn EngineFactory> {
    Arc::new(crate::render::UnsupportedEngineFactory)
}
