//! Queue polling loop.
//!
//! One worker processes one message at a time. Scaling out means running
//! more worker processes; they coordinate only through the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::jobs::{JobOutcome, JobService};
use crate::queue::QueueClient;

/// Counters for one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub finished: u64,
    pub failed: u64,
    pub interrupted: u64,
    pub skipped: u64,
    pub errors: u64,
}

pub struct Worker {
    queue: Arc<dyn QueueClient>,
    jobs: Arc<JobService>,
    shutdown: watch::Receiver<bool>,
    error_backoff: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        jobs: Arc<JobService>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            jobs,
            shutdown,
            error_backoff: Duration::from_secs(5),
        }
    }

    /// Pause after a failed receive.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Poll until shutdown is signalled.
    ///
    /// Messages left in a batch when shutdown arrives are neither processed
    /// nor acked; they return to the queue after their visibility timeout.
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!("Worker started");

        while !self.stopping() {
            let received = tokio::select! {
                result = self.queue.receive() => result,
                _ = self.shutdown.changed() => break,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    stats.errors += 1;
                    error!(
                        "Failed to receive messages, retrying in {:?}: {}",
                        self.error_backoff, e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = self.shutdown.changed() => break,
                    }
                    continue;
                }
            };

            for message in messages {
                if self.stopping() {
                    info!("Shutdown requested, leaving job {} on the queue", message.job_id);
                    break;
                }
                stats.received += 1;
                match self.jobs.run(&message).await {
                    Ok(JobOutcome::Finished) => stats.finished += 1,
                    Ok(JobOutcome::Failed(_)) => stats.failed += 1,
                    Ok(JobOutcome::Interrupted) => stats.interrupted += 1,
                    Ok(JobOutcome::Skipped) => stats.skipped += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!("Job {} could not be processed: {}", message.job_id, e);
                    }
                }
            }
        }

        info!(
            "Worker stopped: {} received, {} finished, {} failed, {} interrupted",
            stats.received, stats.finished, stats.failed, stats.interrupted
        );
        stats
    }
}
