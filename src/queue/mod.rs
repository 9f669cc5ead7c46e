//! Job queue clients.
//!
//! Messages carry only a job id and a priority flag. Delivery is
//! at-least-once: a received message stays invisible until it is acked or
//! its visibility timeout lapses, after which it is redelivered with a new
//! receipt and the old receipt stops working.
//!
//! Two physical queues exist (standard and high priority). A worker reads
//! from the one its [`QueueRole`] selects; an interruptible worker also
//! ignores priority-flagged messages.

mod dedup;
mod memory;

#[cfg(feature = "amqp-broker")]
mod amqp;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use dedup::DedupWindow;
pub use memory::MemoryQueue;

#[cfg(feature = "amqp-broker")]
pub use amqp::AmqpQueue;

/// Maximum messages returned by one receive.
pub const RECEIVE_BATCH_SIZE: usize = 2;
/// Long-poll wait for one receive.
pub const RECEIVE_WAIT: Duration = Duration::from_secs(20);
/// High-priority enqueues with the same job id inside this window are dropped.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),
    #[error("failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unsupported broker URL: {0}")]
    UnsupportedBroker(String),
    #[cfg(feature = "amqp-broker")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Opaque token authorizing deletion of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub job_id: String,
    pub priority: bool,
    pub receipt: ReceiptToken,
}

/// Wire body: `{"jobId": "...", "isHighPriority": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBody {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_high_priority: Option<bool>,
}

impl QueueBody {
    pub fn new(job_id: &str, priority: bool) -> Self {
        Self {
            job_id: job_id.to_string(),
            is_high_priority: Some(priority),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a raw body. Malformed bodies and empty ids yield `None`.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<QueueBody>(raw) {
            Ok(body) if !body.job_id.trim().is_empty() => Some(body),
            Ok(_) => {
                warn!("Dropping queue message with empty jobId");
                None
            }
            Err(e) => {
                warn!("Dropping malformed queue message: {}", e);
                None
            }
        }
    }

    pub fn priority(&self) -> bool {
        self.is_high_priority.unwrap_or(false)
    }
}

/// Which physical queue a worker consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueRole {
    #[default]
    Standard,
    HighPriority,
}

/// Names and receive behavior shared by all backends.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub standard_queue: String,
    pub high_priority_queue: String,
    pub role: QueueRole,
    /// Skip priority-flagged messages on receive.
    pub interruptible: bool,
    pub batch_size: usize,
    pub wait: Duration,
    /// How long a received, unacked message stays invisible.
    pub visibility_timeout: Duration,
    pub dedup_window: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            standard_queue: "shapeshift-jobs".to_string(),
            high_priority_queue: "shapeshift-jobs-high-priority".to_string(),
            role: QueueRole::Standard,
            interruptible: false,
            batch_size: RECEIVE_BATCH_SIZE,
            wait: RECEIVE_WAIT,
            visibility_timeout: Duration::from_secs(30 * 60),
            dedup_window: DEDUP_WINDOW,
        }
    }
}

impl QueueSettings {
    /// Queue consumed by this worker.
    pub fn consume_queue(&self) -> &str {
        match self.role {
            QueueRole::Standard => &self.standard_queue,
            QueueRole::HighPriority => &self.high_priority_queue,
        }
    }

    /// Queue a message with the given priority is published to.
    pub fn publish_queue(&self, priority: bool) -> &str {
        if priority {
            &self.high_priority_queue
        } else {
            &self.standard_queue
        }
    }

    /// Decode raw deliveries, dropping malformed ones and applying the
    /// interruptible filter.
    pub fn decode_batch(&self, raw: Vec<(Vec<u8>, ReceiptToken)>) -> Vec<QueueMessage> {
        self.sort_batch(raw).messages
    }

    /// Like [`decode_batch`](Self::decode_batch), but keeps the receipts of
    /// dropped deliveries so backends without a visibility timeout can
    /// settle them.
    pub fn sort_batch(&self, raw: Vec<(Vec<u8>, ReceiptToken)>) -> SortedBatch {
        let mut batch = SortedBatch::default();
        for (body, receipt) in raw {
            let Some(body) = QueueBody::decode(&body) else {
                batch.malformed.push(receipt);
                continue;
            };
            if self.interruptible && body.priority() {
                batch.filtered.push(receipt);
                continue;
            }
            batch.messages.push(QueueMessage {
                priority: body.priority(),
                job_id: body.job_id,
                receipt,
            });
        }
        batch
    }
}

/// A received batch split by what the worker should do with each delivery.
#[derive(Debug, Default, PartialEq)]
pub struct SortedBatch {
    /// Messages to process.
    pub messages: Vec<QueueMessage>,
    /// Undecodable bodies. Never processable.
    pub malformed: Vec<ReceiptToken>,
    /// Priority messages an interruptible worker leaves for another consumer.
    pub filtered: Vec<ReceiptToken>,
}

/// At-least-once job queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Publish a job. Priority enqueues are deduplicated by job id.
    async fn enqueue(&self, job_id: &str, priority: bool) -> Result<(), QueueError>;

    /// Long-poll for up to a small batch of messages. May return empty.
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a delivered message. Unknown or stale receipts are ignored.
    async fn ack(&self, receipt: &ReceiptToken) -> Result<(), QueueError>;

    /// Approximate number of visible messages in the consumed queue.
    async fn depth(&self) -> Result<u64, QueueError>;
}

/// Build a queue client for `broker_url`.
///
/// `None` or `memory://` gives a process-local queue; `amqp://` and
/// `amqps://` need the `amqp-broker` feature.
pub async fn connect(
    broker_url: Option<&str>,
    settings: QueueSettings,
) -> Result<Arc<dyn QueueClient>, QueueError> {
    match broker_url {
        None => Ok(Arc::new(MemoryQueue::new(settings))),
        Some(url) if url.starts_with("memory://") => Ok(Arc::new(MemoryQueue::new(settings))),
        #[cfg(feature = "amqp-broker")]
        Some(url) if url.starts_with("amqp://") || url.starts_with("amqps://") => {
            Ok(Arc::new(AmqpQueue::connect(url, settings).await?))
        }
        Some(url) => Err(QueueError::UnsupportedBroker(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(body: &str, receipt: &str) -> (Vec<u8>, ReceiptToken) {
        (body.as_bytes().to_vec(), ReceiptToken::new(receipt))
    }

    #[test]
    fn test_body_wire_format() {
        let body = QueueBody::new("job-1", true);
        let json = String::from_utf8(body.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"jobId":"job-1","isHighPriority":true}"#);

        let decoded = QueueBody::decode(br#"{"jobId":"job-2"}"#).unwrap();
        assert_eq!(decoded.job_id, "job-2");
        assert!(!decoded.priority());
    }

    #[test]
    fn test_decode_drops_malformed_and_empty_ids() {
        assert!(QueueBody::decode(b"not json").is_none());
        assert!(QueueBody::decode(br#"{"jobId":""}"#).is_none());
        assert!(QueueBody::decode(br#"{"isHighPriority":true}"#).is_none());
    }

    #[test]
    fn test_decode_batch_keeps_receipts() {
        let settings = QueueSettings::default();
        let messages = settings.decode_batch(vec![
            raw(r#"{"jobId":"a"}"#, "r1"),
            raw("{", "r2"),
            raw(r#"{"jobId":"b","isHighPriority":true}"#, "r3"),
        ]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].receipt, ReceiptToken::new("r1"));
        assert_eq!(messages[1].job_id, "b");
        assert!(messages[1].priority);
    }

    #[test]
    fn test_interruptible_worker_skips_priority_messages() {
        let settings = QueueSettings {
            interruptible: true,
            ..Default::default()
        };
        let messages = settings.decode_batch(vec![
            raw(r#"{"jobId":"a","isHighPriority":true}"#, "r1"),
            raw(r#"{"jobId":"b","isHighPriority":false}"#, "r2"),
        ]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].job_id, "b");
    }

    #[test]
    fn test_sort_batch_keeps_receipts_of_dropped_deliveries() {
        let settings = QueueSettings {
            interruptible: true,
            ..Default::default()
        };
        let batch = settings.sort_batch(vec![
            raw(r#"{"jobId":"a","isHighPriority":true}"#, "r1"),
            raw("not json", "r2"),
            raw(r#"{"jobId":"b"}"#, "r3"),
            raw(r#"{"jobId":""}"#, "r4"),
        ]);
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].receipt, ReceiptToken::new("r3"));
        assert_eq!(batch.filtered, vec![ReceiptToken::new("r1")]);
        assert_eq!(
            batch.malformed,
            vec![ReceiptToken::new("r2"), ReceiptToken::new("r4")]
        );
    }

    #[test]
    fn test_role_selects_queue() {
        let mut settings = QueueSettings::default();
        assert_eq!(settings.consume_queue(), "shapeshift-jobs");
        settings.role = QueueRole::HighPriority;
        assert_eq!(settings.consume_queue(), "shapeshift-jobs-high-priority");
        assert_eq!(settings.publish_queue(false), "shapeshift-jobs");
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let result = connect(Some("kafka://localhost"), QueueSettings::default()).await;
        assert!(matches!(result, Err(QueueError::UnsupportedBroker(_))));
    }
}
