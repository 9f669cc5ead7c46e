//! RabbitMQ backend.
//!
//! Receives with `basic.get` polling so a receive is a bounded long poll
//! like the other backends. The delivery tag is the receipt. AMQP has no
//! visibility timeout, so deliveries the worker will never process are
//! settled at once: malformed bodies are rejected without requeue and
//! priority messages skipped by an interruptible worker are requeued.
//! Deliveries still unacked when the channel closes return to the queue.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    DedupWindow, QueueBody, QueueClient, QueueError, QueueMessage, QueueSettings, ReceiptToken,
    SortedBatch,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AmqpQueue {
    settings: QueueSettings,
    _connection: Connection,
    channel: Channel,
    outstanding: Mutex<HashSet<u64>>,
    dedup: Mutex<DedupWindow>,
}

impl AmqpQueue {
    pub async fn connect(url: &str, settings: QueueSettings) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        for queue in [&settings.standard_queue, &settings.high_priority_queue] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        info!(
            "Connected to AMQP broker, consuming {}",
            settings.consume_queue()
        );
        let dedup = Mutex::new(DedupWindow::new(settings.dedup_window));
        Ok(Self {
            settings,
            _connection: connection,
            channel,
            outstanding: Mutex::new(HashSet::new()),
            dedup,
        })
    }

    fn parse_tag(receipt: &ReceiptToken) -> Option<u64> {
        receipt.as_str().parse().ok()
    }

    /// Reject malformed deliveries and hand filtered ones back to the broker.
    async fn settle_dropped(&self, batch: &SortedBatch) -> Result<(), QueueError> {
        for receipt in &batch.malformed {
            let Some(tag) = self.take_outstanding(receipt).await else {
                continue;
            };
            warn!("Rejecting malformed delivery {}", tag);
            self.channel
                .basic_reject(tag, BasicRejectOptions { requeue: false })
                .await?;
        }
        for receipt in &batch.filtered {
            let Some(tag) = self.take_outstanding(receipt).await else {
                continue;
            };
            debug!("Requeueing priority delivery {} for another consumer", tag);
            self.channel
                .basic_nack(
                    tag,
                    BasicNackOptions {
                        multiple: false,
                        requeue: true,
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn take_outstanding(&self, receipt: &ReceiptToken) -> Option<u64> {
        let tag = Self::parse_tag(receipt)?;
        self.outstanding.lock().await.remove(&tag).then_some(tag)
    }
}

#[async_trait]
impl QueueClient for AmqpQueue {
    async fn enqueue(&self, job_id: &str, priority: bool) -> Result<(), QueueError> {
        if priority && !self.dedup.lock().await.admit(job_id) {
            debug!("Dropping duplicate priority enqueue for {}", job_id);
            return Ok(());
        }
        let payload = QueueBody::new(job_id, priority).encode()?;
        let mut properties = BasicProperties::default().with_delivery_mode(2);
        if priority {
            properties = properties.with_message_id(job_id.to_string().into());
        }
        self.channel
            .basic_publish(
                "",
                self.settings.publish_queue(priority),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + self.settings.wait;
        let queue = self.settings.consume_queue();
        loop {
            let mut raw = Vec::new();
            while raw.len() < self.settings.batch_size.max(1) {
                let Some(message) = self
                    .channel
                    .basic_get(queue, BasicGetOptions { no_ack: false })
                    .await?
                else {
                    break;
                };
                let tag = message.delivery.delivery_tag;
                self.outstanding.lock().await.insert(tag);
                raw.push((message.delivery.data.clone(), ReceiptToken::new(tag.to_string())));
            }

            let batch = self.settings.sort_batch(raw);
            self.settle_dropped(&batch).await?;
            if !batch.messages.is_empty() || Instant::now() >= deadline {
                return Ok(batch.messages);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let Some(tag) = Self::parse_tag(receipt) else {
            debug!("Ignoring ack for foreign receipt {}", receipt);
            return Ok(());
        };
        if !self.outstanding.lock().await.remove(&tag) {
            debug!("Ack for unknown or already acked delivery {}", tag);
            return Ok(());
        }
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let queue = self
            .channel
            .queue_declare(
                self.settings.consume_queue(),
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(u64::from(queue.message_count()))
    }
}
