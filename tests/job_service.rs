//! Job lifecycle driven through the in-memory queue and a snapshot content source.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use shapeshift::config::DeployEnvironment;
use shapeshift::content::{ContentSource, SnapshotContentSource};
use shapeshift::jobs::{InMemoryJobStore, JobOutcome, JobService, JobStore};
use shapeshift::models::{ContentNode, JobStatus, MatterKind, NewJob};
use shapeshift::packaging::{AlternatePackager, PackagingError};
use shapeshift::queue::{MemoryQueue, QueueClient, QueueMessage, QueueSettings};
use shapeshift::worker::Worker;

use support::*;

const BOOK_URL: &str = "https://chem.example.org/Bookshelves/Chemistry";

struct Harness {
    _dir: TempDir,
    store: InMemoryJobStore,
    queue: MemoryQueue,
    content: Arc<SnapshotContentSource>,
    behavior: FakeBehavior,
    service: JobService,
}

async fn harness(environment: DeployEnvironment) -> Harness {
    harness_with(environment, |service| service).await
}

async fn harness_with(
    environment: DeployEnvironment,
    customize: impl FnOnce(JobService) -> JobService,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let content = Arc::new(SnapshotContentSource::new(dir.path().join("content")));
    content.insert(BOOK_URL, &five_page_book()).await.unwrap();

    let store = InMemoryJobStore::default();
    let queue = MemoryQueue::new(QueueSettings {
        wait: Duration::from_millis(50),
        ..Default::default()
    });
    let behavior = FakeBehavior::new();
    let pipeline = pipeline(
        fast_config(&dir.path().join("work")),
        &behavior,
        Arc::new(RecordingCheckpointStore::new()),
    );
    let service = customize(JobService::new(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        content.clone(),
        Arc::new(pipeline),
        environment,
    ));

    Harness {
        _dir: dir,
        store,
        queue,
        content,
        behavior,
        service,
    }
}

fn new_job(url: &str) -> NewJob {
    NewJob {
        url: url.to_string(),
        high_priority: false,
        requester_ip: "203.0.113.9".to_string(),
    }
}

async fn receive_one(queue: &MemoryQueue) -> QueueMessage {
    let mut batch = queue.receive().await.unwrap();
    assert_eq!(batch.len(), 1);
    batch.remove(0)
}

async fn status(h: &Harness, id: &str) -> JobStatus {
    h.store.get(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_create_and_get() {
    let h = harness(DeployEnvironment::Production).await;

    let id = h.service.create(new_job(BOOK_URL)).await.unwrap();
    let job = h.service.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.url, BOOK_URL);
    assert_eq!(job.requester_ip, "203.0.113.9");
    assert!(!job.is_high_priority);

    assert!(h.service.get("no-such-job").await.unwrap().is_none());
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_submit_enqueues_outside_development() {
    let h = harness(DeployEnvironment::Production).await;
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    assert_eq!(h.queue.depth().await.unwrap(), 1);
    assert_eq!(receive_one(&h.queue).await.job_id, job.id);

    let dev = harness(DeployEnvironment::Development).await;
    let job = dev.service.submit(new_job(BOOK_URL)).await.unwrap();
    assert_eq!(dev.queue.depth().await.unwrap(), 0);
    assert_eq!(status(&dev, &job.id).await, JobStatus::Created);
}

#[tokio::test]
async fn test_run_finishes_job_and_acks() {
    let h = harness(DeployEnvironment::Production).await;
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;

    let outcome = h.service.run(&message).await.unwrap();

    assert_eq!(outcome, JobOutcome::Finished);
    assert_eq!(status(&h, &job.id).await, JobStatus::Finished);
    assert_eq!(h.queue.in_flight().await, 0);
    assert_eq!(h.behavior.rendered().len(), 5);
    assert_eq!(h.behavior.launches(), 1);
    assert_eq!(h.behavior.closes(), 1);
}

#[tokio::test]
async fn test_missing_matter_is_created_before_conversion() {
    let h = harness(DeployEnvironment::Production).await;
    h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;
    h.service.run(&message).await.unwrap();

    let book = h.content.resolve(BOOK_URL).await.unwrap().unwrap();
    let tree: ContentNode = h.content.discover(&book).await.unwrap();
    assert!(tree.matter_section(MatterKind::Front).is_some());
    assert!(tree.matter_section(MatterKind::Back).is_some());
    assert_eq!(tree.children.first().unwrap().title, "Front Matter");
    assert_eq!(tree.children.last().unwrap().title, "Back Matter");
}

#[tokio::test]
async fn test_staging_leaves_message_unacked() {
    let h = harness(DeployEnvironment::Staging).await;
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;

    assert_eq!(h.service.run(&message).await.unwrap(), JobOutcome::Finished);
    assert_eq!(status(&h, &job.id).await, JobStatus::Finished);
    assert_eq!(h.queue.in_flight().await, 1);
}

#[tokio::test]
async fn test_unresolvable_url_fails_job() {
    let h = harness(DeployEnvironment::Production).await;
    let job = h
        .service
        .submit(new_job("https://chem.example.org/Unknown"))
        .await
        .unwrap();
    let message = receive_one(&h.queue).await;

    let outcome = h.service.run(&message).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed(ref reason) if reason.contains("Unknown")));
    assert_eq!(status(&h, &job.id).await, JobStatus::Failed);
    assert_eq!(h.queue.in_flight().await, 0);
    assert!(h.behavior.attempts().is_empty());
}

#[tokio::test]
async fn test_tripped_breaker_fails_job() {
    let h = harness(DeployEnvironment::Production).await;
    for id in 1..=5 {
        h.behavior.fail(&page_url(id), ALWAYS);
    }
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;

    let outcome = h.service.run(&message).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed(ref reason) if reason.contains("circuit breaker")));
    assert_eq!(status(&h, &job.id).await, JobStatus::Failed);
    assert_eq!(h.queue.in_flight().await, 0);
    // The engine is released even though the conversion failed.
    assert_eq!(h.behavior.closes(), h.behavior.launches());
}

#[tokio::test]
async fn test_redelivered_terminal_job_is_skipped() {
    let h = harness(DeployEnvironment::Production).await;
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;
    h.service.run(&message).await.unwrap();

    h.queue.enqueue(&job.id, false).await.unwrap();
    let redelivered = receive_one(&h.queue).await;
    let outcome = h.service.run(&redelivered).await.unwrap();

    assert_eq!(outcome, JobOutcome::Skipped);
    assert_eq!(status(&h, &job.id).await, JobStatus::Finished);
    assert_eq!(h.queue.in_flight().await, 0);
    assert_eq!(h.behavior.rendered().len(), 5);
}

#[tokio::test]
async fn test_unknown_job_message_is_dropped() {
    let h = harness(DeployEnvironment::Production).await;
    h.queue.enqueue("ghost", false).await.unwrap();
    let message = receive_one(&h.queue).await;

    assert_eq!(h.service.run(&message).await.unwrap(), JobOutcome::Skipped);
    assert_eq!(h.queue.in_flight().await, 0);
}

#[tokio::test]
async fn test_shutdown_leaves_job_in_progress() {
    let (_tx, rx) = watch::channel(true);
    let h = harness_with(DeployEnvironment::Production, |service| {
        service.with_shutdown(rx)
    })
    .await;
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;

    assert_eq!(h.service.run(&message).await.unwrap(), JobOutcome::Interrupted);
    assert_eq!(status(&h, &job.id).await, JobStatus::InProgress);
    assert_eq!(h.queue.in_flight().await, 1);
}

struct RejectingPackager;

#[async_trait]
impl AlternatePackager for RejectingPackager {
    async fn package(&self, _root: &ContentNode) -> Result<(), PackagingError> {
        Err(PackagingError::Failed("manifest rejected".to_string()))
    }
}

#[tokio::test]
async fn test_packaging_failure_fails_job() {
    let h = harness_with(DeployEnvironment::Production, |service| {
        service.with_packager(Arc::new(RejectingPackager))
    })
    .await;
    let job = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let message = receive_one(&h.queue).await;

    let outcome = h.service.run(&message).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed(ref reason) if reason.contains("manifest rejected")));
    assert_eq!(status(&h, &job.id).await, JobStatus::Failed);
}

#[tokio::test]
async fn test_worker_drains_queue_until_shutdown() {
    let h = harness(DeployEnvironment::Production).await;
    let first = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    let second = h.service.submit(new_job(BOOK_URL)).await.unwrap();
    h.queue.enqueue("ghost", false).await.unwrap();

    let Harness {
        _dir,
        store,
        queue,
        service,
        ..
    } = h;
    let (tx, rx) = watch::channel(false);
    let worker = Worker::new(Arc::new(queue.clone()), Arc::new(service), rx);
    let handle = tokio::spawn(worker.run());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = true;
        for id in [&first.id, &second.id] {
            let job = store.get(id).await.unwrap().unwrap();
            done &= job.status.is_terminal();
        }
        if done && queue.depth().await.unwrap() == 0 && queue.in_flight().await == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "worker did not drain the queue");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();

    let stats = handle.await.unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.finished, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(queue.in_flight().await, 0);
}
