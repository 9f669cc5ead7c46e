//! Command implementations.

use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::context::AppContext;
use crate::backlog::{
    BacklogError, BacklogSignal, FleetStatusCounter, HttpMetricPublisher, MetricPublisher,
    TracingMetricPublisher,
};
use crate::config::Settings;
use crate::models::NewJob;
use crate::pipeline::{ConversionEvent, ConversionOptions};
use crate::worker::Worker;

/// Consume the queue until a termination signal arrives.
pub async fn cmd_worker(settings: Settings) -> anyhow::Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(
        "Starting worker on {} (queue={}, role={:?}, interruptible={})",
        host,
        settings.queue.consume_queue(),
        settings.queue.role,
        settings.queue.interruptible
    );

    let error_backoff = settings.receive_error_backoff();
    let ctx = AppContext::build(settings).await?;
    let shutdown = shutdown_signal();
    let jobs = Arc::new(ctx.job_service(Some(shutdown.clone())));

    let stats = Worker::new(ctx.queue.clone(), jobs, shutdown)
        .with_error_backoff(error_backoff)
        .run()
        .await;
    ctx.pipeline.cleanup().await;

    println!(
        "{} Worker stopped: {} finished, {} failed, {} interrupted",
        style("✓").green(),
        stats.finished,
        stats.failed,
        stats.interrupted
    );
    Ok(())
}

/// Create a job and publish it.
pub async fn cmd_submit(
    settings: Settings,
    url: String,
    high_priority: bool,
    requester_ip: String,
) -> anyhow::Result<()> {
    let ctx = AppContext::build(settings).await?;
    let job = ctx
        .job_service(None)
        .submit(NewJob {
            url,
            high_priority,
            requester_ip,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    if !ctx.settings.environment.enqueues_jobs() {
        println!(
            "{} Development environment: job stored but not enqueued",
            style("!").yellow()
        );
    }
    Ok(())
}

/// Print a job record. Unknown ids are reported, not treated as errors.
pub async fn cmd_status(settings: Settings, id: &str) -> anyhow::Result<()> {
    let ctx = AppContext::build(settings).await?;
    match ctx.job_service(None).get(id).await? {
        Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
        None => println!("{} Job {} not found", style("!").yellow(), id),
    }
    Ok(())
}

/// Convert one book directly, showing progress.
pub async fn cmd_convert(settings: Settings, url: &str, force_restart: bool) -> anyhow::Result<()> {
    let ctx = AppContext::build(settings).await?;
    let book = ctx
        .content
        .resolve(url)
        .await?
        .ok_or_else(|| anyhow::anyhow!("{} does not resolve to a book", url))?;
    let root = ctx.content.discover(&book).await?;

    let progress = ProgressBar::new(root.node_count() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("#>-"),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let bar = progress.clone();
    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ConversionEvent::PhaseChanged(phase) => bar.set_message(phase.as_str()),
                ConversionEvent::TaskConverted {
                    current,
                    total,
                    message,
                } => {
                    bar.set_length(total as u64);
                    bar.set_position(current);
                    bar.set_message(message);
                }
                ConversionEvent::TaskFailed { task_id, error, .. } => {
                    bar.println(format!("{} {}: {}", style("✗").red(), task_id, error));
                }
                ConversionEvent::CoverFailed { variant, error } => {
                    bar.println(format!("{} {} cover: {}", style("!").yellow(), variant.name(), error));
                }
            }
        }
    });

    let options = ConversionOptions {
        force_restart,
        events: Some(tx),
        shutdown: Some(shutdown_signal()),
    };
    let result = ctx
        .pipeline
        .with_cleanup(ctx.pipeline.convert(&root, options))
        .await;
    let _ = reporter.await;

    match result {
        Ok(outcome) => {
            progress.finish_and_clear();
            println!(
                "{} {} ({} pages, {}/{} tasks, {} covers) in {:?}",
                style("✓").green(),
                outcome.content_path.display(),
                outcome.page_count,
                outcome.tasks_converted,
                outcome.tasks_total,
                outcome.covers_generated,
                outcome.elapsed
            );
            for location in &outcome.published {
                info!("Published {}", location);
            }
            let stats = ctx.rate_limiter.stats().await;
            info!(
                "Content API points consumed: {} (limited {} times)",
                stats.total_consumed, stats.times_limited
            );
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// Sample queue depth and worker count, publish the ratio.
pub async fn cmd_backlog(settings: Settings) -> anyhow::Result<()> {
    let backlog = settings.backlog.clone();
    let ctx = AppContext::build(settings).await?;

    let status_url = backlog
        .status_url
        .clone()
        .ok_or(BacklogError::MissingSetting("fleet status URL"))?;
    let publisher: Arc<dyn MetricPublisher> = match &backlog.metric_endpoint {
        Some(endpoint) => Arc::new(HttpMetricPublisher::new(endpoint.clone())?),
        None => {
            warn!("No metric endpoint configured, logging the metric instead");
            Arc::new(TracingMetricPublisher)
        }
    };

    let signal = BacklogSignal::new(
        backlog,
        ctx.queue.clone(),
        Arc::new(FleetStatusCounter::new(status_url)?),
        publisher,
    )?;
    let point = signal.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&point)?);
    Ok(())
}

/// Flip a watch channel on SIGTERM or Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received, finishing current checkpoint");
        let _ = tx.send(true);
        // Keep the sender alive so receivers see `true` rather than a closed channel.
        tx.closed().await;
    });
    rx
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
