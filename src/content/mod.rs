//! Content source collaborator.
//!
//! Resolves book URLs, discovers the page tree and creates missing matter
//! sections. Every call into the upstream API is charged against the shared
//! [`RateLimiter`].

mod snapshot;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{BookId, ContentNode, MatterKind};
use crate::rate_limit::{RateLimitError, RateLimiter};

pub use snapshot::SnapshotContentSource;

/// Rate limit points charged for one structure discovery.
pub const DISCOVER_POINTS: u32 = 2;
/// Rate limit points charged for creating one matter section.
pub const CREATE_MATTER_POINTS: u32 = 4;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content not found: {0}")]
    NotFound(String),
    #[error("invalid content URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("content source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed content snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Map a book URL to its identifier. `None` when the URL does not name a book.
    async fn resolve(&self, url: &str) -> Result<Option<BookId>, ContentError>;

    /// Fetch the current content tree rooted at `book`.
    async fn discover(&self, book: &BookId) -> Result<ContentNode, ContentError>;

    /// Create the front or back matter container under `root`.
    async fn create_matter(&self, root: &ContentNode, kind: MatterKind)
        -> Result<(), ContentError>;
}

/// Wraps a source so discovery and matter creation wait for rate limit points.
pub struct RateLimitedSource {
    inner: Arc<dyn ContentSource>,
    limiter: RateLimiter,
}

impl RateLimitedSource {
    pub fn new(inner: Arc<dyn ContentSource>, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl ContentSource for RateLimitedSource {
    async fn resolve(&self, url: &str) -> Result<Option<BookId>, ContentError> {
        self.inner.resolve(url).await
    }

    async fn discover(&self, book: &BookId) -> Result<ContentNode, ContentError> {
        self.limiter.wait_until_available(DISCOVER_POINTS).await?;
        self.inner.discover(book).await
    }

    async fn create_matter(
        &self,
        root: &ContentNode,
        kind: MatterKind,
    ) -> Result<(), ContentError> {
        self.limiter.wait_until_available(CREATE_MATTER_POINTS).await?;
        self.inner.create_matter(root, kind).await
    }
}
