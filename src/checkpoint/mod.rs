//! Durable per-job progress records.
//!
//! A checkpoint is written after every task attempt and read back when a job
//! is redelivered, so a successor process can skip work already done. The
//! task list itself is never stored; only the output keys that completed.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Persisted progress for one job key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Output keys of every task that produced an artifact, in completion order.
    #[serde(rename = "convertedPages")]
    pub converted_keys: Vec<String>,
    #[serde(rename = "lastProcessedPageId")]
    pub last_task_id: String,
    #[serde(rename = "totalPagesProcessed")]
    pub total_processed: u64,
    pub consecutive_failures: u32,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn contains(&self, output_key: &str) -> bool {
        self.converted_keys.iter().any(|k| k == output_key)
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt checkpoint for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Storage backend for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically replace the checkpoint for `job_key`.
    async fn save(&self, job_key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Load the checkpoint for `job_key`. `None` means a fresh run.
    async fn load(&self, job_key: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Remove the checkpoint. Removing a missing checkpoint succeeds.
    async fn clear(&self, job_key: &str) -> Result<(), CheckpointError>;
}
