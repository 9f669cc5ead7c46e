//! Secondary output format collaborator.
//!
//! After the print conversion succeeds the job hands the same content tree
//! to an alternate packager (a course-cartridge style export). Only the seam
//! lives here; manifest generation is provided elsewhere.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::models::ContentNode;

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("packaging failed: {0}")]
    Failed(String),
    #[error("packaging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait AlternatePackager: Send + Sync {
    async fn package(&self, root: &ContentNode) -> Result<(), PackagingError>;
}

/// Packager that does nothing. Used when no alternate format is configured.
#[derive(Debug, Default, Clone)]
pub struct DisabledPackager;

#[async_trait]
impl AlternatePackager for DisabledPackager {
    async fn package(&self, root: &ContentNode) -> Result<(), PackagingError> {
        info!(
            "Alternate packaging disabled, skipping {}",
            root.book_id()
        );
        Ok(())
    }
}
