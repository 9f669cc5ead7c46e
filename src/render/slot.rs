//! Ownership of the shared rendering engine instance.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{EngineFactory, RenderEngine, RenderError};

/// Holds at most one live engine and decides when to replace it.
///
/// The engine is launched lazily, recycled after `recycle_after` tasks or
/// as soon as it reports a lost connection, and closed by [`release`].
/// Dropping a slot that still holds an engine closes it in the background.
///
/// [`release`]: EngineSlot::release
pub struct EngineSlot {
    factory: Arc<dyn EngineFactory>,
    engine: Option<Arc<dyn RenderEngine>>,
    recycle_after: u32,
    tasks_since_launch: u32,
    launches: u64,
}

impl EngineSlot {
    pub fn new(factory: Arc<dyn EngineFactory>, recycle_after: u32) -> Self {
        Self {
            factory,
            engine: None,
            recycle_after: recycle_after.max(1),
            tasks_since_launch: 0,
            launches: 0,
        }
    }

    /// Return a usable engine, replacing the current one if it is stale or gone.
    pub async fn ensure_healthy(&mut self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        if let Some(engine) = &self.engine {
            if !engine.is_connected() {
                warn!("Rendering engine disconnected, restarting");
                self.release().await;
            } else if self.tasks_since_launch >= self.recycle_after {
                info!(
                    "Recycling rendering engine after {} tasks",
                    self.tasks_since_launch
                );
                self.release().await;
            }
        }
        self.current().await
    }

    /// The live engine, launching one if the slot is empty.
    pub async fn current(&mut self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }

        debug!("Launching rendering engine");
        let engine = self.factory.launch().await?;
        self.launches += 1;
        self.tasks_since_launch = 0;
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    /// Count one processed task against the recycle budget.
    pub fn record_task(&mut self) {
        self.tasks_since_launch += 1;
    }

    /// Close and forget the current engine. Close errors are logged only.
    pub async fn release(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close().await {
                warn!("Error closing rendering engine (ignored): {}", e);
            }
        }
        self.tasks_since_launch = 0;
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    pub fn launches(&self) -> u64 {
        self.launches
    }
}

impl Drop for EngineSlot {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        warn!("EngineSlot dropped while holding an engine, closing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = engine.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{HtmlRenderRequest, PageRenderRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Counters {
        launched: AtomicU32,
        closed: AtomicU32,
        connected: AtomicBool,
    }

    struct StubEngine {
        counters: Arc<Counters>,
        fail_close: bool,
    }

    #[async_trait]
    impl RenderEngine for StubEngine {
        async fn render_page(&self, _: &PageRenderRequest) -> Result<Vec<u8>, RenderError> {
            Ok(Vec::new())
        }
        async fn render_html(&self, _: &HtmlRenderRequest) -> Result<Vec<u8>, RenderError> {
            Ok(Vec::new())
        }
        fn is_connected(&self) -> bool {
            self.counters.connected.load(Ordering::SeqCst)
        }
        async fn close(&self) -> Result<(), RenderError> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(RenderError::Disconnected)
            } else {
                Ok(())
            }
        }
    }

    struct StubFactory {
        counters: Arc<Counters>,
        fail_close: bool,
    }

    #[async_trait]
    impl EngineFactory for StubFactory {
        async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
            self.counters.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubEngine {
                counters: self.counters.clone(),
                fail_close: self.fail_close,
            }))
        }
    }

    fn slot(recycle_after: u32, fail_close: bool) -> (EngineSlot, Arc<Counters>) {
        let counters = Arc::new(Counters {
            launched: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            connected: AtomicBool::new(true),
        });
        let factory = Arc::new(StubFactory {
            counters: counters.clone(),
            fail_close,
        });
        (EngineSlot::new(factory, recycle_after), counters)
    }

    #[tokio::test]
    async fn test_lazy_launch_and_reuse() {
        let (mut slot, counters) = slot(50, false);
        assert!(!slot.is_active());

        slot.ensure_healthy().await.unwrap();
        slot.record_task();
        slot.ensure_healthy().await.unwrap();
        assert_eq!(counters.launched.load(Ordering::SeqCst), 1);
        assert_eq!(slot.launches(), 1);
    }

    #[tokio::test]
    async fn test_recycles_after_task_budget() {
        let (mut slot, counters) = slot(2, false);
        for _ in 0..5 {
            slot.ensure_healthy().await.unwrap();
            slot.record_task();
        }
        // Launch, recycle before task 3, recycle before task 5.
        assert_eq!(counters.launched.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnected_engine_is_replaced_despite_close_error() {
        let (mut slot, counters) = slot(50, true);
        slot.ensure_healthy().await.unwrap();

        counters.connected.store(false, Ordering::SeqCst);
        slot.ensure_healthy().await.unwrap();

        assert_eq!(counters.launched.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(slot.is_active());
    }

    #[tokio::test]
    async fn test_release_closes_once() {
        let (mut slot, counters) = slot(50, false);
        slot.ensure_healthy().await.unwrap();
        slot.release().await;
        slot.release().await;
        assert!(!slot.is_active());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }
}
