//! Checkpoints stored as JSON files in each job's scratch directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Checkpoint, CheckpointError, CheckpointStore};
use crate::utils::write_atomic;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// File-backed store: `{root}/pdf/{job_key}/checkpoint.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, job_key: &str) -> PathBuf {
        self.root.join("pdf").join(job_key).join(CHECKPOINT_FILE)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, job_key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(job_key);
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&path, bytes).await?;
        debug!(
            "Saved checkpoint for {} ({} converted, {} consecutive failures)",
            job_key,
            checkpoint.converted_keys.len(),
            checkpoint.consecutive_failures
        );
        Ok(())
    }

    async fn load(&self, job_key: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(job_key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(source) => {
                warn!("Checkpoint at {} is unreadable", path.display());
                Err(CheckpointError::Corrupt {
                    key: job_key.to_string(),
                    source,
                })
            }
        }
    }

    async fn clear(&self, job_key: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(job_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample(failures: u32) -> Checkpoint {
        Checkpoint {
            converted_keys: vec!["0001_TOC".to_string(), "0002_chem-12".to_string()],
            last_task_id: "page-chem-12".to_string(),
            total_processed: 2,
            consecutive_failures: failures,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_load_missing_is_fresh_run() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("chem-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_and_clear_removes() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save("chem-1", &sample(0)).await.unwrap();
        store.save("chem-1", &sample(2)).await.unwrap();
        let loaded = store.load("chem-1").await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 2);
        assert!(loaded.contains("0002_chem-12"));

        store.clear("chem-1").await.unwrap();
        assert!(store.load("chem-1").await.unwrap().is_none());
        store.clear("chem-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_persisted_field_names() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save("chem-1", &sample(1)).await.unwrap();

        let raw = std::fs::read_to_string(store.path_for("chem-1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["convertedPages"].is_array());
        assert_eq!(value["lastProcessedPageId"], "page-chem-12");
        assert_eq!(value["totalPagesProcessed"], 2);
        assert_eq!(value["consecutiveFailures"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let path = store.path_for("chem-1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{\"convertedPages\": [").unwrap();

        assert!(matches!(
            store.load("chem-1").await,
            Err(CheckpointError::Corrupt { .. })
        ));
    }
}
