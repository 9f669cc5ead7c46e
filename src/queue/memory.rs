//! Process-local queue with visibility-timeout redelivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{DedupWindow, QueueBody, QueueClient, QueueError, QueueMessage, QueueSettings, ReceiptToken};

const POLL_SLICE: Duration = Duration::from_millis(100);

struct InFlight {
    queue: String,
    body: Vec<u8>,
    visible_at: Instant,
}

struct State {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    in_flight: HashMap<ReceiptToken, InFlight>,
    dedup: DedupWindow,
}

impl State {
    /// Move expired in-flight messages back to the front of their queue.
    fn requeue_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<ReceiptToken> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(r, _)| r.clone())
            .collect();
        for receipt in expired {
            if let Some(message) = self.in_flight.remove(&receipt) {
                debug!("Visibility timeout lapsed for {}, redelivering", receipt);
                self.queues
                    .entry(message.queue)
                    .or_default()
                    .push_front(message.body);
            }
        }
    }
}

/// In-memory [`QueueClient`] for development and tests.
///
/// Clones share the same queues.
#[derive(Clone)]
pub struct MemoryQueue {
    settings: QueueSettings,
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        let dedup = DedupWindow::new(settings.dedup_window);
        Self {
            settings,
            state: Arc::new(Mutex::new(State {
                queues: HashMap::new(),
                in_flight: HashMap::new(),
                dedup,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// A handle over the same queues consuming with different settings.
    pub fn with_settings(&self, settings: QueueSettings) -> Self {
        Self {
            settings,
            state: self.state.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Messages delivered but not yet acked or expired.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    fn take_batch(&self, state: &mut State) -> Vec<(Vec<u8>, ReceiptToken)> {
        let queue_name = self.settings.consume_queue().to_string();
        let visible_at = Instant::now() + self.settings.visibility_timeout;
        let mut batch = Vec::new();
        while batch.len() < self.settings.batch_size.max(1) {
            let Some(body) = state
                .queues
                .get_mut(&queue_name)
                .and_then(|q| q.pop_front())
            else {
                break;
            };
            let receipt = ReceiptToken::new(Uuid::new_v4().to_string());
            state.in_flight.insert(
                receipt.clone(),
                InFlight {
                    queue: queue_name.clone(),
                    body: body.clone(),
                    visible_at,
                },
            );
            batch.push((body, receipt));
        }
        batch
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn enqueue(&self, job_id: &str, priority: bool) -> Result<(), QueueError> {
        let body = QueueBody::new(job_id, priority).encode()?;
        let queue = self.settings.publish_queue(priority).to_string();
        {
            let mut state = self.state.lock().await;
            if priority && !state.dedup.admit(job_id) {
                debug!("Dropping duplicate priority enqueue for {}", job_id);
                return Ok(());
            }
            state.queues.entry(queue).or_default().push_back(body);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + self.settings.wait;
        loop {
            let notified = self.notify.notified();
            let raw = {
                let mut state = self.state.lock().await;
                state.requeue_expired();
                self.take_batch(&mut state)
            };
            // Dropped and filtered deliveries still count as received.
            if !raw.is_empty() {
                return Ok(self.settings.decode_batch(raw));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let slice = (deadline - now).min(POLL_SLICE);
            let _ = tokio::time::timeout(slice, notified).await;
        }
    }

    async fn ack(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(receipt).is_none() {
            debug!("Ack for unknown or stale receipt {}", receipt);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        state.requeue_expired();
        let depth = state
            .queues
            .get(self.settings.consume_queue())
            .map_or(0, |q| q.len());
        Ok(depth as u64)
    }
}
