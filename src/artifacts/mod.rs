//! Publication of finished conversion outputs.
//!
//! Keys mirror the scratch layout (`pdf/{lib}-{id}/Content.pdf`,
//! `pdf/{lib}-{id}/covers/{Variant}.pdf`), so a local store rooted at the
//! scratch directory publishes in place.

mod local;
#[cfg(feature = "s3-storage")]
mod s3;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::BookId;

pub use local::LocalArtifactStore;
#[cfg(feature = "s3-storage")]
pub use s3::S3ArtifactStore;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to store artifact {key}: {reason}")]
    Store { key: String, reason: String },
    #[error("BUCKET must be set unless USE_LOCAL_STORAGE=true")]
    MissingBucket,
    #[error("object storage support not compiled. Rebuild with: cargo build --features s3-storage")]
    Unsupported,
}

/// Where finished outputs go.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the file at `source` under `key` and return its location.
    async fn publish(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<String, ArtifactError>;
}

/// Key of a book's merged content.
pub fn content_key(book: &BookId) -> String {
    format!("pdf/{}/Content.pdf", book.job_key())
}

/// Key of one cover file.
pub fn cover_key(book: &BookId, file_name: &str) -> String {
    format!("pdf/{}/covers/{}", book.job_key(), file_name)
}

/// Artifact storage selection.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    /// Keep outputs in the scratch root instead of uploading (`USE_LOCAL_STORAGE`).
    pub use_local_storage: bool,
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// S3-compatible endpoint; path-style addressing is used when set.
    pub endpoint_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            use_local_storage: true,
            bucket: None,
            region: None,
            endpoint_url: None,
        }
    }
}

/// Build the artifact store `settings` select. Local stores are rooted at `work_root`.
pub async fn connect(
    settings: &StorageSettings,
    work_root: &Path,
) -> Result<Arc<dyn ArtifactStore>, ArtifactError> {
    if settings.use_local_storage {
        return Ok(Arc::new(LocalArtifactStore::new(work_root)));
    }
    let bucket = settings.bucket.clone().ok_or(ArtifactError::MissingBucket)?;
    object_store(bucket, settings).await
}

#[cfg(feature = "s3-storage")]
async fn object_store(
    bucket: String,
    settings: &StorageSettings,
) -> Result<Arc<dyn ArtifactStore>, ArtifactError> {
    Ok(Arc::new(S3ArtifactStore::connect(bucket, settings).await))
}

#[cfg(not(feature = "s3-storage"))]
async fn object_store(
    _bucket: String,
    _settings: &StorageSettings,
) -> Result<Arc<dyn ArtifactStore>, ArtifactError> {
    Err(ArtifactError::Unsupported)
}
