//! Filesystem artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ArtifactError, ArtifactStore};
use crate::utils::write_atomic;

/// Copies artifacts under a root directory.
///
/// A store rooted at the scratch directory leaves outputs where the
/// pipeline wrote them.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn publish(
        &self,
        key: &str,
        source: &Path,
        _content_type: &str,
    ) -> Result<String, ArtifactError> {
        let dest = self.path_for(key);
        let read_error = |source_err| ArtifactError::Read {
            path: source.to_path_buf(),
            source: source_err,
        };

        if dest == source {
            tokio::fs::metadata(source).await.map_err(read_error)?;
            debug!("{} already in place", dest.display());
            return Ok(dest.display().to_string());
        }

        let bytes = tokio::fs::read(source).await.map_err(read_error)?;
        write_atomic(&dest, bytes)
            .await
            .map_err(|e| ArtifactError::Store {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Copied {} to {}", source.display(), dest.display());
        Ok(dest.display().to_string())
    }
}
