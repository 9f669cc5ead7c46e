//! Job lifecycle.
//!
//! The job service is the only writer of job records. A queue message moves
//! its job `created → inprogress → {finished, failed}`; the message is acked
//! only after the terminal status has been stored, so a crash in between
//! leads to redelivery rather than a lost job.

mod store;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::DeployEnvironment;
use crate::content::{ContentError, ContentSource};
use crate::models::{Job, JobStatus, MatterKind, NewJob};
use crate::packaging::{AlternatePackager, DisabledPackager, PackagingError};
use crate::pipeline::{ConversionError, ConversionOptions, ConversionOutcome, ConversionPipeline};
use crate::queue::{QueueClient, QueueError, QueueMessage};

pub use store::{FileJobStore, InMemoryJobStore, JobStore, JobStoreError};

/// Failures of the job service itself. Conversion failures are not errors
/// here; they end the job as `failed`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Why a job execution did not produce its outputs.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("URL does not resolve to a book: {0}")]
    Unresolvable(String),
    #[error("content source error: {0}")]
    Content(#[from] ContentError),
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("alternate packaging failed: {0}")]
    Packaging(#[from] PackagingError),
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished,
    Failed(String),
    /// Shutdown stopped the conversion; the job stays in progress for redelivery.
    Interrupted,
    /// Unknown or already terminal job; nothing was run.
    Skipped,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueClient>,
    content: Arc<dyn ContentSource>,
    pipeline: Arc<ConversionPipeline>,
    packager: Arc<dyn AlternatePackager>,
    environment: DeployEnvironment,
    shutdown: Option<watch::Receiver<bool>>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueClient>,
        content: Arc<dyn ContentSource>,
        pipeline: Arc<ConversionPipeline>,
        environment: DeployEnvironment,
    ) -> Self {
        Self {
            store,
            queue,
            content,
            pipeline,
            packager: Arc::new(DisabledPackager),
            environment,
            shutdown: None,
        }
    }

    pub fn with_packager(mut self, packager: Arc<dyn AlternatePackager>) -> Self {
        self.packager = packager;
        self
    }

    /// Stop conversions at the next checkpoint boundary once this flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn environment(&self) -> DeployEnvironment {
        self.environment
    }

    /// Persist a new job in the `created` state and return its id.
    pub async fn create(&self, input: NewJob) -> Result<String, JobError> {
        Ok(self.insert(input).await?.id)
    }

    async fn insert(&self, input: NewJob) -> Result<Job, JobError> {
        let job = Job::new(input);
        self.store.put(&job).await?;
        info!(
            "Job {} created (url={}, high_priority={})",
            job.id, job.url, job.is_high_priority
        );
        Ok(job)
    }

    /// Look up a job. Unknown ids are `None`, not an error.
    pub async fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        Ok(self.store.get(id).await?)
    }

    /// Create a job and publish it to the queue.
    ///
    /// In development the job is stored but not enqueued.
    pub async fn submit(&self, input: NewJob) -> Result<Job, JobError> {
        let job = self.insert(input).await?;
        if self.environment.enqueues_jobs() {
            self.queue.enqueue(&job.id, job.is_high_priority).await?;
        } else {
            debug!("Development environment, not enqueueing job {}", job.id);
        }
        Ok(job)
    }

    /// Process one queue message to completion.
    pub async fn run(&self, message: &QueueMessage) -> Result<JobOutcome, JobError> {
        let Some(job) = self.store.get(&message.job_id).await? else {
            warn!("Job {} not found, dropping message", message.job_id);
            self.ack(message).await?;
            return Ok(JobOutcome::Skipped);
        };
        if job.status.is_terminal() {
            info!(
                "Job {} already {}, acknowledging redelivered message",
                job.id, job.status
            );
            self.ack(message).await?;
            return Ok(JobOutcome::Skipped);
        }

        let job = self.set_status(job, JobStatus::InProgress).await?;
        info!("Job {} in progress ({})", job.id, job.url);

        let outcome = match self.execute(&job).await {
            Ok(result) => {
                info!(
                    "Job {} converted {} of {} tasks into {}",
                    job.id,
                    result.tasks_converted,
                    result.tasks_total,
                    result.content_path.display()
                );
                JobOutcome::Finished
            }
            Err(ExecutionError::Conversion(ConversionError::Interrupted)) => {
                info!("Job {} interrupted by shutdown, leaving it for redelivery", job.id);
                return Ok(JobOutcome::Interrupted);
            }
            Err(e) => {
                error!("Job {} failed: {}", job.id, e);
                JobOutcome::Failed(e.to_string())
            }
        };

        let status = match outcome {
            JobOutcome::Finished => JobStatus::Finished,
            _ => JobStatus::Failed,
        };
        self.finish(job, status, message).await?;
        Ok(outcome)
    }

    /// Record the terminal status, then ack the message.
    pub async fn finish(
        &self,
        job: Job,
        status: JobStatus,
        message: &QueueMessage,
    ) -> Result<Job, JobError> {
        let job = self.set_status(job, status).await?;
        self.ack(message).await?;
        Ok(job)
    }

    async fn execute(&self, job: &Job) -> Result<ConversionOutcome, ExecutionError> {
        let book = self
            .content
            .resolve(&job.url)
            .await?
            .ok_or_else(|| ExecutionError::Unresolvable(job.url.clone()))?;

        let mut root = self.content.discover(&book).await?;
        let missing: Vec<MatterKind> = [MatterKind::Front, MatterKind::Back]
            .into_iter()
            .filter(|kind| root.matter_section(*kind).is_none())
            .collect();
        if !missing.is_empty() {
            for kind in &missing {
                self.content.create_matter(&root, *kind).await?;
            }
            root = self.content.discover(&book).await?;
        }

        let options = ConversionOptions {
            shutdown: self.shutdown.clone(),
            ..Default::default()
        };
        self.pipeline
            .with_cleanup(async move {
                let outcome = self.pipeline.convert(&root, options).await?;
                self.packager.package(&root).await?;
                Ok::<_, ExecutionError>(outcome)
            })
            .await
    }

    async fn set_status(&self, mut job: Job, status: JobStatus) -> Result<Job, JobError> {
        if !job.status.can_transition_to(status) {
            return Err(JobError::InvalidTransition {
                id: job.id,
                from: job.status,
                to: status,
            });
        }
        job.status = status;
        job.updated_at = chrono::Utc::now();
        self.store.put(&job).await?;
        Ok(job)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), JobError> {
        if self.environment.acks_messages() {
            self.queue.ack(&message.receipt).await?;
        } else {
            debug!(
                "{} environment, leaving message for job {} on the queue",
                self.environment.as_str(),
                message.job_id
            );
        }
        Ok(())
    }
}
