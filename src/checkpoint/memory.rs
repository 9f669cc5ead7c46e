//! In-process checkpoint store for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointError, CheckpointStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    records: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, job_key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.records
            .write()
            .await
            .insert(job_key.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, job_key: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.records.read().await.get(job_key).cloned())
    }

    async fn clear(&self, job_key: &str) -> Result<(), CheckpointError> {
        self.records.write().await.remove(job_key);
        Ok(())
    }
}
