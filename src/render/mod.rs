//! Rendering engine abstraction.
//!
//! A `RenderEngine` turns either a remote document or a local HTML string
//! into PDF bytes. The pipeline never talks to an engine directly; it goes
//! through an [`EngineSlot`] which owns the single shared instance and
//! recycles it to keep long runs from growing without bound.

mod config;
mod slot;

#[cfg(feature = "browser")]
mod chromium;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use config::BrowserEngineConfig;
pub use slot::EngineSlot;

#[cfg(feature = "browser")]
pub use chromium::{ChromiumEngine, ChromiumEngineFactory};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch rendering engine: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("page script failed: {0}")]
    Script(String),
    #[error("PDF generation failed: {0}")]
    Print(String),
    #[error("render did not complete within {0:?}")]
    Timeout(Duration),
    #[error("rendering engine disconnected")]
    Disconnected,
    #[error("browser support not compiled. Rebuild with: cargo build --features browser")]
    Unsupported,
}

/// Deadline for one render unless the caller sets another.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 975,
            height: 1000,
        }
    }
}

/// Directory markup to swap into the fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingInjection {
    pub html: String,
    pub heading: Option<String>,
    /// Drop the page's own title (used for table-of-contents pages).
    pub remove_title: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderFooter {
    pub header: String,
    pub footer: String,
}

/// Everything needed to print one remote page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRenderRequest {
    /// Document to navigate to.
    pub url: String,
    /// Target of the title link.
    pub canonical_url: String,
    /// Sub-resource requests whose URL contains any of these are blocked.
    pub blocked_url_fragments: Vec<String>,
    pub viewport: Viewport,
    pub listing: Option<ListingInjection>,
    pub stylesheet: String,
    pub header_footer: Option<HeaderFooter>,
    /// The engine gives up on the page after this long and still closes it.
    pub timeout: Duration,
}

/// A standalone HTML document printed at an explicit paper size.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlRenderRequest {
    pub html: String,
    pub width_in: f64,
    pub height_in: f64,
    pub timeout: Duration,
}

/// One live rendering engine instance.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render_page(&self, request: &PageRenderRequest) -> Result<Vec<u8>, RenderError>;

    async fn render_html(&self, request: &HtmlRenderRequest) -> Result<Vec<u8>, RenderError>;

    /// False once the underlying process or connection has gone away.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), RenderError>;
}

/// Creates engine instances on demand.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError>;
}

/// Factory used when the binary is built without a browser.
#[derive(Debug, Default, Clone)]
pub struct UnsupportedEngineFactory;

#[async_trait]
impl EngineFactory for UnsupportedEngineFactory {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        Err(RenderError::Unsupported)
    }
}
