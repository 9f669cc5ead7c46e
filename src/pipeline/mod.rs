//! Checkpointed book conversion.
//!
//! A conversion walks the content tree into an ordered task list, renders
//! each task to a per-task artifact, merges the artifacts into
//! `Content.pdf` and finally renders the cover variants. Progress is saved
//! to the checkpoint store after every task attempt so an interrupted or
//! redelivered job resumes where the last process left off.
//!
//! ```text
//! Initializing(ForceRestart | Resume)
//!     -> TaskLoop
//!     -> Merge -> CoverGeneration
//!     -> Finalizing | Aborted
//! ```

mod config;
mod cover;
mod error;
mod merge;
mod policy;
mod tasks;
mod templates;
mod workspace;

pub use config::{ConversionConfig, ConversionSettings, DEFAULT_BLOCKED_URL_FRAGMENTS};
pub use cover::{cover_request, dimensions, CoverDimensions, CoverVariant};
pub use error::{ConversionError, TaskError};
pub use merge::{
    natural_cmp, sort_keys, ArtifactMerger, DocumentMetadata, LopdfMerger, MergeError,
    MergeSummary,
};
pub use policy::{CircuitBreaker, RetryExhausted, RetryPolicy};
pub use tasks::{
    build_task_list, listing_level, ConversionTask, DirectoryHeading, DirectoryListing, TaskKind,
    TaskSource,
};
pub use templates::{escape_html, page_request, PrintContext, MAIN_COLOR};
pub use workspace::JobWorkspace;

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::artifacts::{
    content_key, cover_key, ArtifactStore, LocalArtifactStore, PDF_CONTENT_TYPE,
};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::models::{BookId, ContentNode};
use crate::rate_limit::RateLimiter;
use crate::render::{EngineFactory, EngineSlot, RenderEngine};
use crate::utils::write_atomic;

/// Rate limit points charged per page render.
pub const PAGE_RENDER_POINTS: u32 = 2;
/// Rate limit points charged per cover render.
pub const COVER_RENDER_POINTS: u32 = 1;

/// Time an engine gets past its render deadline to close the page.
const RENDER_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Coarse pipeline state, reported through [`ConversionEvent::PhaseChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPhase {
    Initializing,
    TaskLoop,
    Merge,
    CoverGeneration,
    Finalizing,
    Aborted,
}

impl ConversionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::TaskLoop => "TaskLoop",
            Self::Merge => "Merge",
            Self::CoverGeneration => "CoverGeneration",
            Self::Finalizing => "Finalizing",
            Self::Aborted => "Aborted",
        }
    }
}

/// Events emitted while a conversion runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    PhaseChanged(ConversionPhase),
    /// A task produced its artifact.
    TaskConverted {
        current: u64,
        total: usize,
        message: String,
    },
    /// A task exhausted its retries.
    TaskFailed {
        task_id: String,
        consecutive_failures: u32,
        error: String,
    },
    CoverFailed {
        variant: CoverVariant,
        error: String,
    },
}

/// Per-run options.
#[derive(Debug, Default)]
pub struct ConversionOptions {
    /// Discard any checkpoint and scratch files before starting.
    pub force_restart: bool,
    /// Progress channel. Sends never block the task loop.
    pub events: Option<mpsc::UnboundedSender<ConversionEvent>>,
    /// Flips to `true` when the process is shutting down.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl ConversionOptions {
    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn emit(&self, event: ConversionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn enter(&self, book: &BookId, phase: ConversionPhase) {
        info!("[{}] {}", book, phase.as_str());
        self.emit(ConversionEvent::PhaseChanged(phase));
    }
}

/// Result of a completed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub content_path: PathBuf,
    pub page_count: u32,
    pub tasks_total: usize,
    /// Tasks with an artifact in the merge, including ones restored from a checkpoint.
    pub tasks_converted: usize,
    /// Tasks that exhausted their retries during this run.
    pub tasks_failed: usize,
    pub covers_generated: usize,
    pub covers_failed: usize,
    /// Published locations, content first, then each published cover.
    pub published: Vec<String>,
    pub elapsed: Duration,
}

/// Mutable progress for one run, mirrored into the checkpoint.
struct Progress {
    converted_keys: Vec<String>,
    converted: HashSet<String>,
    last_task_id: String,
    total_processed: u64,
    consecutive_failures: u32,
    failed_this_run: usize,
}

impl Progress {
    fn fresh() -> Self {
        Self {
            converted_keys: Vec::new(),
            converted: HashSet::new(),
            last_task_id: String::new(),
            total_processed: 0,
            consecutive_failures: 0,
            failed_this_run: 0,
        }
    }

    fn resume(checkpoint: Checkpoint, breaker: &CircuitBreaker, book: &BookId) -> Self {
        let mut consecutive_failures = checkpoint.consecutive_failures;
        if breaker.is_open(consecutive_failures) {
            warn!(
                "[{}] Checkpoint recorded {} consecutive failures, resetting before resume",
                book, consecutive_failures
            );
            consecutive_failures = 0;
        }
        Self {
            converted: checkpoint.converted_keys.iter().cloned().collect(),
            converted_keys: checkpoint.converted_keys,
            last_task_id: checkpoint.last_task_id,
            total_processed: checkpoint.total_processed,
            consecutive_failures,
            failed_this_run: 0,
        }
    }

    fn is_converted(&self, output_key: &str) -> bool {
        self.converted.contains(output_key)
    }

    fn record_success(&mut self, task: &ConversionTask) {
        if self.converted.insert(task.output_key.clone()) {
            self.converted_keys.push(task.output_key.clone());
        }
        self.last_task_id = task.id.clone();
        self.total_processed += 1;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self, task: &ConversionTask) {
        self.last_task_id = task.id.clone();
        self.consecutive_failures += 1;
        self.failed_this_run += 1;
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            converted_keys: self.converted_keys.clone(),
            last_task_id: self.last_task_id.clone(),
            total_processed: self.total_processed,
            consecutive_failures: self.consecutive_failures,
            timestamp: Utc::now(),
        }
    }
}

/// Converts content trees into print artifacts.
///
/// One pipeline owns one rendering engine slot. Jobs must be run one at a
/// time per pipeline; call [`cleanup`](Self::cleanup) (or use
/// [`with_cleanup`](Self::with_cleanup)) after every job.
pub struct ConversionPipeline {
    config: ConversionConfig,
    rate_limiter: RateLimiter,
    checkpoints: Arc<dyn CheckpointStore>,
    merger: Arc<dyn ArtifactMerger>,
    artifacts: Arc<dyn ArtifactStore>,
    engine: Mutex<EngineSlot>,
}

impl ConversionPipeline {
    pub fn new(
        config: ConversionConfig,
        rate_limiter: RateLimiter,
        engines: Arc<dyn EngineFactory>,
        checkpoints: Arc<dyn CheckpointStore>,
        merger: Arc<dyn ArtifactMerger>,
    ) -> Self {
        let engine = Mutex::new(EngineSlot::new(engines, config.recycle_after));
        let artifacts = Arc::new(LocalArtifactStore::new(&config.work_root));
        Self {
            config,
            rate_limiter,
            checkpoints,
            merger,
            artifacts,
            engine,
        }
    }

    /// Publish finished outputs to `store` instead of leaving them in the scratch root.
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = store;
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn workspace(&self, book: &BookId) -> JobWorkspace {
        JobWorkspace::new(&self.config.work_root, book)
    }

    /// Release the rendering engine. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        self.engine.lock().await.release().await;
    }

    /// Run `fut`, then [`cleanup`](Self::cleanup) whatever its outcome.
    pub async fn with_cleanup<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let result = fut.await;
        self.cleanup().await;
        result
    }

    /// Convert `root` into `Content.pdf` plus covers.
    ///
    /// On failure the checkpoint and scratch files are left in place for a
    /// later resume.
    pub async fn convert(
        &self,
        root: &ContentNode,
        options: ConversionOptions,
    ) -> Result<ConversionOutcome, ConversionError> {
        let book = root.book_id();
        let started = Instant::now();

        let result = self.run(root, &book, &options, started).await;
        match &result {
            Ok(outcome) => info!(
                "[{}] Conversion finished in {:?}: {}/{} tasks, {} pages, {} covers ({} failed)",
                book,
                outcome.elapsed,
                outcome.tasks_converted,
                outcome.tasks_total,
                outcome.page_count,
                outcome.covers_generated,
                outcome.covers_failed
            ),
            Err(ConversionError::Interrupted) => {
                info!("[{}] Conversion interrupted, progress kept for resume", book);
                options.enter(&book, ConversionPhase::Aborted);
            }
            Err(e) => {
                error!("[{}] Conversion aborted: {}", book, e);
                options.enter(&book, ConversionPhase::Aborted);
            }
        }
        result
    }

    async fn run(
        &self,
        root: &ContentNode,
        book: &BookId,
        options: &ConversionOptions,
        started: Instant,
    ) -> Result<ConversionOutcome, ConversionError> {
        let job_key = book.job_key();
        let workspace = self.workspace(book);

        options.enter(book, ConversionPhase::Initializing);
        let mut progress = if options.force_restart {
            info!("[{}] Force restart: clearing checkpoint and scratch files", book);
            self.checkpoints.clear(&job_key).await?;
            workspace.clear_scratch().await?;
            Progress::fresh()
        } else {
            match self.checkpoints.load(&job_key).await? {
                Some(checkpoint) => {
                    info!(
                        "[{}] Resuming from checkpoint ({} tasks done, last {})",
                        book,
                        checkpoint.converted_keys.len(),
                        checkpoint.last_task_id
                    );
                    Progress::resume(checkpoint, &self.config.breaker, book)
                }
                None => Progress::fresh(),
            }
        };
        workspace.prepare().await?;

        let tasks = build_task_list(root);
        let print_ctx = PrintContext::for_book(
            root,
            self.config.viewport,
            self.config.blocked_url_fragments.clone(),
        );

        options.enter(book, ConversionPhase::TaskLoop);
        self.run_tasks(book, &tasks, &print_ctx, &workspace, &mut progress, options, started)
            .await?;

        options.enter(book, ConversionPhase::Merge);
        let mut keys: Vec<String> = tasks
            .iter()
            .filter(|t| progress.is_converted(&t.output_key))
            .map(|t| t.output_key.clone())
            .collect();
        sort_keys(&mut keys);
        let tasks_converted = keys.len();
        let page_count = self.merge(root, &keys, &workspace).await?;

        options.enter(book, ConversionPhase::CoverGeneration);
        let (covers, covers_failed) =
            self.generate_covers(root, page_count, &workspace, options).await;

        options.enter(book, ConversionPhase::Finalizing);
        let published = self.publish(book, &workspace, &covers).await?;
        self.checkpoints.clear(&job_key).await?;
        workspace.clear_scratch().await?;

        Ok(ConversionOutcome {
            content_path: workspace.content_path(),
            page_count,
            tasks_total: tasks.len(),
            tasks_converted,
            tasks_failed: progress.failed_this_run,
            covers_generated: covers.len(),
            covers_failed,
            published,
            elapsed: started.elapsed(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tasks(
        &self,
        book: &BookId,
        tasks: &[ConversionTask],
        print_ctx: &PrintContext,
        workspace: &JobWorkspace,
        progress: &mut Progress,
        options: &ConversionOptions,
        started: Instant,
    ) -> Result<(), ConversionError> {
        let job_key = book.job_key();
        let pending: Vec<&ConversionTask> = tasks
            .iter()
            .filter(|t| !progress.is_converted(&t.output_key))
            .collect();
        info!(
            "[{}] {} tasks, {} already converted, {} pending",
            book,
            tasks.len(),
            tasks.len() - pending.len(),
            pending.len()
        );

        for task in pending {
            if options.shutdown_requested() {
                return Err(ConversionError::Interrupted);
            }
            let elapsed = started.elapsed();
            if elapsed > self.config.max_job_duration {
                error!(
                    "[{}] Job exceeded maximum duration of {:?}",
                    book, self.config.max_job_duration
                );
                return Err(ConversionError::JobTimeoutExceeded { elapsed });
            }
            if self.config.breaker.is_open(progress.consecutive_failures) {
                return Err(ConversionError::CircuitBreakerTripped {
                    failures: progress.consecutive_failures,
                });
            }

            let engine = self.engine.lock().await.ensure_healthy().await?;
            debug!(
                "[{}] Converting {} {} ({})",
                book,
                task.kind.as_str(),
                task.source.node.title,
                task.output_key
            );
            let label = format!("Convert {} {}", task.kind.as_str(), task.source.fetch_url);
            let result = self
                .config
                .retry
                .run(&label, |_| {
                    self.execute_task(engine.as_ref(), task, print_ctx, workspace)
                })
                .await;
            self.engine.lock().await.record_task();

            match result {
                Ok(()) => {
                    progress.record_success(task);
                    options.emit(ConversionEvent::TaskConverted {
                        current: progress.total_processed,
                        total: tasks.len(),
                        message: format!("Converted {}", task.source.node.title),
                    });
                }
                Err(exhausted) => {
                    progress.record_failure(task);
                    warn!(
                        "[{}] Task {} failed after {} attempts ({} consecutive failures): {}",
                        book,
                        task.id,
                        exhausted.attempts,
                        progress.consecutive_failures,
                        exhausted.last_error
                    );
                    options.emit(ConversionEvent::TaskFailed {
                        task_id: task.id.clone(),
                        consecutive_failures: progress.consecutive_failures,
                        error: exhausted.last_error.to_string(),
                    });
                }
            }
            self.checkpoints.save(&job_key, &progress.checkpoint()).await?;

            if self.config.breaker.is_open(progress.consecutive_failures) {
                error!(
                    "[{}] Circuit breaker tripped after {} consecutive failures",
                    book, progress.consecutive_failures
                );
                return Err(ConversionError::CircuitBreakerTripped {
                    failures: progress.consecutive_failures,
                });
            }
        }
        Ok(())
    }

    async fn execute_task(
        &self,
        engine: &dyn RenderEngine,
        task: &ConversionTask,
        print_ctx: &PrintContext,
        workspace: &JobWorkspace,
    ) -> Result<(), TaskError> {
        let mut request = page_request(task, print_ctx)?;
        request.timeout = self.config.render_timeout;
        self.rate_limiter
            .wait_until_available(PAGE_RENDER_POINTS)
            .await?;
        let guard = self.render_guard();
        let bytes = tokio::time::timeout(guard, engine.render_page(&request))
            .await
            .map_err(|_| TaskError::Timeout(guard))??;
        write_atomic(&workspace.artifact_path(&task.output_key), bytes).await?;
        Ok(())
    }

    /// Outer deadline for a render call. Engines enforce `render_timeout`
    /// themselves so they can close the page; this only catches engines that
    /// hang past it.
    fn render_guard(&self) -> Duration {
        self.config.render_timeout + RENDER_CLOSE_GRACE
    }

    async fn merge(
        &self,
        root: &ContentNode,
        keys: &[String],
        workspace: &JobWorkspace,
    ) -> Result<u32, ConversionError> {
        if keys.is_empty() {
            return Err(MergeError::Empty.into());
        }
        let inputs: Vec<PathBuf> = keys.iter().map(|k| workspace.artifact_path(k)).collect();
        let metadata = DocumentMetadata {
            title: format!("{} (Inner Content)", root.print_title()),
            author: root.print_info.author_name.clone().unwrap_or_default(),
            producer: self.config.producer.clone(),
            creator: self.config.creator.clone(),
            created_at: Utc::now(),
        };
        let output = workspace.content_path();
        let merger = self.merger.clone();

        info!("Merging {} artifacts into {}", inputs.len(), output.display());
        let summary =
            tokio::task::spawn_blocking(move || merger.merge(&inputs, &metadata, &output))
                .await??;
        Ok(summary.page_count)
    }

    /// Render every cover variant concurrently and return the ones that
    /// rendered. Failures are counted, not raised.
    async fn generate_covers(
        &self,
        root: &ContentNode,
        page_count: u32,
        workspace: &JobWorkspace,
        options: &ConversionOptions,
    ) -> (Vec<CoverVariant>, usize) {
        let covers_dir = workspace.covers_dir();

        let renders = CoverVariant::ALL.iter().map(|&variant| {
            let covers_dir = covers_dir.as_path();
            async move {
                let label = format!("Generate {} cover", variant.name());
                let result = self
                    .config
                    .retry
                    .run(&label, |_| self.render_cover(variant, root, page_count, covers_dir))
                    .await;
                (variant, result)
            }
        });

        let mut generated = Vec::new();
        let mut failed = 0;
        for (variant, result) in join_all(renders).await {
            match result {
                Ok(()) => generated.push(variant),
                Err(exhausted) => {
                    failed += 1;
                    warn!(
                        "{} cover failed after {} attempts: {}",
                        variant.name(),
                        exhausted.attempts,
                        exhausted.last_error
                    );
                    options.emit(ConversionEvent::CoverFailed {
                        variant,
                        error: exhausted.last_error.to_string(),
                    });
                }
            }
        }
        (generated, failed)
    }

    /// Publish the merged content, then each rendered cover. Only the
    /// content is required; cover publication is best effort like rendering.
    async fn publish(
        &self,
        book: &BookId,
        workspace: &JobWorkspace,
        covers: &[CoverVariant],
    ) -> Result<Vec<String>, ConversionError> {
        let content = self
            .artifacts
            .publish(&content_key(book), &workspace.content_path(), PDF_CONTENT_TYPE)
            .await?;
        info!("[{}] Published content to {}", book, content);

        let mut published = vec![content];
        for variant in covers {
            let file_name = variant.file_name();
            let source = workspace.covers_dir().join(&file_name);
            match self
                .artifacts
                .publish(&cover_key(book, &file_name), &source, PDF_CONTENT_TYPE)
                .await
            {
                Ok(location) => published.push(location),
                Err(e) => warn!("[{}] Failed to publish {} cover: {}", book, variant.name(), e),
            }
        }
        Ok(published)
    }

    /// One cover attempt. Engine acquisition is part of the attempt, so a
    /// failed relaunch counts as a cover failure.
    async fn render_cover(
        &self,
        variant: CoverVariant,
        root: &ContentNode,
        page_count: u32,
        covers_dir: &Path,
    ) -> Result<(), TaskError> {
        let mut request = cover_request(variant, root, page_count)?;
        request.timeout = self.config.render_timeout;
        self.rate_limiter
            .wait_until_available(COVER_RENDER_POINTS)
            .await?;
        let engine = self.engine.lock().await.ensure_healthy().await?;
        let guard = self.render_guard();
        let bytes = tokio::time::timeout(guard, engine.render_html(&request))
            .await
            .map_err(|_| TaskError::Timeout(guard))??;
        write_atomic(&covers_dir.join(variant.file_name()), bytes).await?;
        Ok(())
    }
}
