//! Shared fakes for the integration tests.
//!
//! The fake rendering engine emits real one-page PDFs whose MediaBox width is
//! `500 + node id`, so merged output can be checked page by page.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};

use shapeshift::backlog::{BacklogError, MetricPoint, MetricPublisher, WorkerCounter};
use shapeshift::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, MemoryCheckpointStore};
use shapeshift::config::DeployEnvironment;
use shapeshift::content::SnapshotContentSource;
use shapeshift::jobs::{InMemoryJobStore, JobService};
use shapeshift::models::ContentNode;
use shapeshift::pipeline::{
    CircuitBreaker, ConversionConfig, ConversionPipeline, LopdfMerger, RetryPolicy,
};
use shapeshift::queue::{QueueClient, QueueError, QueueMessage, ReceiptToken};
use shapeshift::rate_limit::RateLimiter;
use shapeshift::render::{
    EngineFactory, HtmlRenderRequest, PageRenderRequest, RenderEngine, RenderError,
};

/// Width of cover pages produced by the fake engine.
pub const COVER_WIDTH: i64 = 1000;

pub const LIB: &str = "chem";

/// Fails a URL on every attempt.
pub const ALWAYS: u32 = u32::MAX;

pub fn node(id: u64, title: &str, children: Vec<ContentNode>) -> ContentNode {
    ContentNode {
        id,
        lib: LIB.to_string(),
        title: title.to_string(),
        url: page_url(id),
        subdomain: LIB.to_string(),
        summary: String::new(),
        tags: Vec::new(),
        license: None,
        matter_type: None,
        print_info: Default::default(),
        children,
    }
}

pub fn page_url(id: u64) -> String {
    format!("https://{}.example.org/Book/{}", LIB, id)
}

/// A root page with four leaf pages: five page tasks, keys `0001_chem-1` .. `0005_chem-5`.
pub fn five_page_book() -> ContentNode {
    node(
        1,
        "Chemistry",
        (2..=5)
            .map(|id| node(id, &format!("{}: Section", id - 1), Vec::new()))
            .collect(),
    )
}

pub fn output_key(position: u64) -> String {
    format!("{:04}_{}-{}", position, LIB, position)
}

/// PDF bytes for a single page of the given width.
pub fn one_page_pdf(width: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 0 m 10 10 l S".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn width_for(url: &str) -> i64 {
    url.rsplit('/')
        .next()
        .and_then(|id| id.parse::<i64>().ok())
        .map(|id| 500 + id)
        .unwrap_or(612)
}

/// MediaBox widths of every page of a PDF, in page order.
pub fn page_widths(path: &Path) -> Vec<i64> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let page = doc.get_dictionary(*id).unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            media_box[2].as_i64().unwrap()
        })
        .collect()
}

#[derive(Default)]
struct EngineState {
    failures: HashMap<String, u32>,
    attempts: Vec<String>,
    rendered: Vec<String>,
    cover_attempts: u32,
    deadlines: Vec<Duration>,
    watched: Option<(PathBuf, Option<bool>)>,
}

/// Scripted behavior shared by every engine a [`FakeFactory`] launches.
#[derive(Clone, Default)]
pub struct FakeBehavior {
    state: Arc<Mutex<EngineState>>,
    delay: Arc<Mutex<Option<Duration>>>,
    fail_covers: Arc<Mutex<bool>>,
    max_launches: Arc<Mutex<Option<u32>>>,
    launches: Arc<AtomicU32>,
    failed_launches: Arc<AtomicU32>,
    closes: Arc<AtomicU32>,
}

impl FakeBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` renders of `url`. [`ALWAYS`] never recovers.
    pub fn fail(&self, url: &str, times: u32) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(url.to_string(), times);
        self
    }

    /// Slow down page renders. Renders slower than the request's deadline
    /// end with [`RenderError::Timeout`] once the deadline passes.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Launches after the first `n` fail.
    pub fn limit_launches(&self, n: u32) {
        *self.max_launches.lock().unwrap() = Some(n);
    }

    pub fn fail_covers(&self) {
        *self.fail_covers.lock().unwrap() = true;
    }

    /// Record whether `path` exists when the first page is rendered.
    pub fn watch_path(&self, path: PathBuf) {
        self.state.lock().unwrap().watched = Some((path, None));
    }

    pub fn watched_path_existed(&self) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .watched
            .as_ref()
            .and_then(|(_, seen)| *seen)
    }

    /// URLs of every page render attempt, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// URLs of page renders that succeeded, in order.
    pub fn rendered(&self) -> Vec<String> {
        self.state.lock().unwrap().rendered.clone()
    }

    pub fn cover_attempts(&self) -> u32 {
        self.state.lock().unwrap().cover_attempts
    }

    /// Deadlines carried by every render request, pages and covers alike.
    pub fn deadlines(&self) -> Vec<Duration> {
        self.state.lock().unwrap().deadlines.clone()
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn failed_launches(&self) -> u32 {
        self.failed_launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> Arc<dyn EngineFactory> {
        Arc::new(FakeFactory {
            behavior: self.clone(),
        })
    }
}

pub struct FakeFactory {
    behavior: FakeBehavior,
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        let limit = *self.behavior.max_launches.lock().unwrap();
        if limit.is_some_and(|n| self.behavior.launches() >= n) {
            self.behavior.failed_launches.fetch_add(1, Ordering::SeqCst);
            return Err(RenderError::Launch("chrome crashed on start".to_string()));
        }
        self.behavior.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeEngine {
            behavior: self.behavior.clone(),
        }))
    }
}

pub struct FakeEngine {
    behavior: FakeBehavior,
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn render_page(&self, request: &PageRenderRequest) -> Result<Vec<u8>, RenderError> {
        self.behavior
            .state
            .lock()
            .unwrap()
            .deadlines
            .push(request.timeout);
        let delay = *self.behavior.delay.lock().unwrap();
        if let Some(delay) = delay {
            if delay > request.timeout {
                tokio::time::sleep(request.timeout).await;
                return Err(RenderError::Timeout(request.timeout));
            }
            tokio::time::sleep(delay).await;
        }

        let mut state = self.behavior.state.lock().unwrap();
        state.attempts.push(request.url.clone());
        if let Some((path, seen)) = state.watched.as_mut() {
            if seen.is_none() {
                *seen = Some(path.exists());
            }
        }
        if let Some(remaining) = state.failures.get_mut(&request.url) {
            if *remaining > 0 {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                return Err(RenderError::Navigation {
                    url: request.url.clone(),
                    reason: "net::ERR_CONNECTION_RESET".to_string(),
                });
            }
        }
        state.rendered.push(request.url.clone());
        Ok(one_page_pdf(width_for(&request.url)))
    }

    async fn render_html(&self, request: &HtmlRenderRequest) -> Result<Vec<u8>, RenderError> {
        {
            let mut state = self.behavior.state.lock().unwrap();
            state.cover_attempts += 1;
            state.deadlines.push(request.timeout);
        }
        if *self.behavior.fail_covers.lock().unwrap() {
            return Err(RenderError::Print("cover template too large".to_string()));
        }
        Ok(one_page_pdf(COVER_WIDTH))
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.behavior.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory checkpoint store that keeps a copy of every save.
#[derive(Clone, Default)]
pub struct RecordingCheckpointStore {
    inner: MemoryCheckpointStore,
    saves: Arc<Mutex<Vec<Checkpoint>>>,
    clears: Arc<AtomicU32>,
}

impl RecordingCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> Vec<Checkpoint> {
        self.saves.lock().unwrap().clone()
    }

    pub fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for RecordingCheckpointStore {
    async fn save(&self, job_key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.saves.lock().unwrap().push(checkpoint.clone());
        self.inner.save(job_key, checkpoint).await
    }

    async fn load(&self, job_key: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.load(job_key).await
    }

    async fn clear(&self, job_key: &str) -> Result<(), CheckpointError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear(job_key).await
    }
}

/// Conversion settings with millisecond retry delays.
pub fn fast_config(work_root: &Path) -> ConversionConfig {
    ConversionConfig {
        work_root: work_root.to_path_buf(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(2),
        },
        breaker: CircuitBreaker::new(3),
        ..Default::default()
    }
}

pub fn pipeline(
    config: ConversionConfig,
    behavior: &FakeBehavior,
    checkpoints: Arc<dyn CheckpointStore>,
) -> ConversionPipeline {
    ConversionPipeline::new(
        config,
        RateLimiter::new(),
        behavior.factory(),
        checkpoints,
        Arc::new(LopdfMerger),
    )
}

/// Queue whose transport is down.
#[derive(Clone, Default)]
pub struct BrokenQueue {
    receives: Arc<AtomicU32>,
}

impl BrokenQueue {
    pub fn receives(&self) -> u32 {
        self.receives.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueClient for BrokenQueue {
    async fn enqueue(&self, _job_id: &str, _priority: bool) -> Result<(), QueueError> {
        Err(QueueError::Transport("connection refused".to_string()))
    }

    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::Transport("connection refused".to_string()))
    }

    async fn ack(&self, _receipt: &ReceiptToken) -> Result<(), QueueError> {
        Err(QueueError::Transport("connection refused".to_string()))
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Err(QueueError::Transport("connection refused".to_string()))
    }
}

/// Worker count that is fixed, or unavailable when `None`.
pub struct FixedWorkers(pub Option<u64>);

#[async_trait]
impl WorkerCounter for FixedWorkers {
    async fn running_workers(&self) -> Result<u64, BacklogError> {
        self.0
            .ok_or_else(|| BacklogError::Workers("service not found".to_string()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    points: Arc<Mutex<Vec<MetricPoint>>>,
}

impl RecordingPublisher {
    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricPublisher for RecordingPublisher {
    async fn publish(&self, point: &MetricPoint) -> Result<(), BacklogError> {
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

/// Production job service over `queue`, with scratch and content under `root`.
pub fn job_service(root: &Path, behavior: &FakeBehavior, queue: Arc<dyn QueueClient>) -> JobService {
    JobService::new(
        Arc::new(InMemoryJobStore::default()),
        queue,
        Arc::new(SnapshotContentSource::new(root.join("content"))),
        Arc::new(pipeline(
            fast_config(&root.join("work")),
            behavior,
            Arc::new(RecordingCheckpointStore::new()),
        )),
        DeployEnvironment::Production,
    )
}
