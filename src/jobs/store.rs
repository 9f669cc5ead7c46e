//! Job record storage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::Job;
use crate::utils::write_atomic;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt job record {id}: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode job record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value persistence for jobs, keyed by id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job.
    async fn put(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError>;
}

/// Volatile store for tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }
}

/// One JSON file per job under `{root}/jobs/`.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    root: PathBuf,
}

impl FileJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        // Ids are generated UUIDs; anything else is flattened.
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join("jobs").join(format!("{}.json", safe))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn put(&self, job: &Job) -> Result<(), JobStoreError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.path_for(&job.id), bytes).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| JobStoreError::Corrupt {
                id: id.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, NewJob};

    fn job() -> Job {
        Job::new(NewJob {
            url: "https://chem.libretexts.org/Bookshelves/Intro".to_string(),
            high_priority: true,
            requester_ip: "10.0.0.1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_file_store_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let mut job = job();
        store.put(&job).await.unwrap();

        job.status = JobStatus::InProgress;
        store.put(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);

        let raw = std::fs::read_to_string(dir.path().join("jobs").join(format!("{}.json", job.id)))
            .unwrap();
        assert!(raw.contains("\"status\": \"inprogress\""));
        assert!(raw.contains("\"isHighPriority\": true"));
    }

    #[tokio::test]
    async fn test_missing_job_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(InMemoryJobStore::new().get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("jobs")).unwrap();
        std::fs::write(dir.path().join("jobs").join("bad.json"), b"{").unwrap();
        assert!(matches!(
            store.get("bad").await,
            Err(JobStoreError::Corrupt { .. })
        ));
    }
}
