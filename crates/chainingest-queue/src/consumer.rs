//! Batch-synchronized queue consumer.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use chainingest_core::{IngestMetrics, NoopMetrics};

use crate::error::QueueError;
use crate::event::{decode_message, ChainEvent};

/// One message as handed out by the queue service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    /// Opaque lease handle; deleting by it acknowledges the message.
    pub receipt_handle: String,
    pub body: String,
}

/// The managed queue the consumer drains.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Fetch the next batch. May long-poll; an empty batch is not an error.
    async fn receive(&self) -> Result<Vec<RawMessage>, QueueError>;

    /// Remove a received message for good.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// How long a received message stays invisible to other consumers.
    fn visibility_timeout(&self) -> Duration;
}

/// Verdict of a [`ConsumeFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeDecision {
    Accept,
    /// Delete without forwarding.
    Skip,
}

pub type ConsumeFilter = Arc<dyn Fn(&ChainEvent) -> ConsumeDecision + Send + Sync>;

/// Accept only events whose `chain_id` is in `ids`.
pub fn accept_chains(ids: impl IntoIterator<Item = u64>) -> ConsumeFilter {
    let ids: HashSet<u64> = ids.into_iter().collect();
    Arc::new(move |event: &ChainEvent| {
        if ids.contains(&event.chain_id) {
            ConsumeDecision::Accept
        } else {
            ConsumeDecision::Skip
        }
    })
}

#[derive(Debug, Clone)]
pub struct QueueConsumerConfig {
    /// Capacity of the output channel.
    pub channel_capacity: usize,
    /// Pause after a failed `receive`.
    pub error_backoff: Duration,
    /// Label passed to the consumed/filtered counters.
    pub source: String,
}

impl Default for QueueConsumerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10,
            error_backoff: Duration::from_secs(1),
            source: "sqs".into(),
        }
    }
}

/// Count of forwarded messages not yet settled.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn acquire(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // register before reading the count so a release in between is not lost
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A forwarded message. Settle it with [`ack`](Self::ack) or
/// [`fail`](Self::fail); dropping it unsettled counts as a failure.
pub struct QueueMessage {
    event: ChainEvent,
    message_id: String,
    receipt_handle: String,
    expires_at: Instant,
    service: Arc<dyn QueueService>,
    in_flight: Arc<InFlight>,
    settled: bool,
}

impl QueueMessage {
    pub fn event(&self) -> &ChainEvent {
        &self.event
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the visibility lease has run out. Advisory: the queue may
    /// already have handed the message to someone else.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }

    /// Delete the message from the queue. A failed delete is logged; the
    /// message will then be redelivered.
    pub async fn ack(mut self) {
        self.settled = true;
        if let Err(e) = self.service.delete(&self.receipt_handle).await {
            tracing::warn!(
                message_id = %self.message_id,
                event = %self.event.id,
                error = %e,
                "failed to delete acknowledged message"
            );
        }
    }

    /// Leave the message on the queue for redelivery once its lease expires.
    pub fn fail(mut self) {
        self.settled = true;
        tracing::debug!(message_id = %self.message_id, event = %self.event.id, "message failed");
    }
}

impl Drop for QueueMessage {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                message_id = %self.message_id,
                event = %self.event.id,
                "message dropped without ack or fail"
            );
        }
        self.in_flight.release();
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("message_id", &self.message_id)
            .field("event", &self.event)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Drains a [`QueueService`] into a bounded channel, one batch at a time.
pub struct QueueConsumer {
    service: Arc<dyn QueueService>,
    filter: ConsumeFilter,
    config: QueueConsumerConfig,
    metrics: Arc<dyn IngestMetrics>,
}

impl QueueConsumer {
    pub fn new(service: Arc<dyn QueueService>, filter: ConsumeFilter, config: QueueConsumerConfig) -> Self {
        Self {
            service,
            filter,
            config,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawn the consumer task. It runs until `shutdown` flips to `true`
    /// (or its sender is dropped) or the returned receiver is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> (mpsc::Receiver<QueueMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = tokio::spawn(self.run(tx, shutdown));
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<QueueMessage>, mut shutdown: watch::Receiver<bool>) {
        let in_flight = Arc::new(InFlight::default());
        tracing::info!(source = %self.config.source, "queue consumer started");

        loop {
            if *shutdown.borrow() || tx.is_closed() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                r = self.service.receive() => r,
            };
            let batch = match received {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "queue receive failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => continue,
                    }
                }
            };
            if batch.is_empty() {
                continue;
            }

            let expires_at = Instant::now() + self.service.visibility_timeout();
            tracing::debug!(messages = batch.len(), "batch received");

            for raw in batch {
                let event = match decode_message(&raw.body) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(message_id = %raw.message_id, error = %e, "undecodable message left on queue");
                        continue;
                    }
                };
                self.metrics.inc_consumed(event.chain_id, &self.config.source);

                if (self.filter)(&event) == ConsumeDecision::Skip {
                    if let Err(e) = self.service.delete(&raw.receipt_handle).await {
                        tracing::warn!(message_id = %raw.message_id, error = %e, "failed to delete filtered message");
                    }
                    self.metrics.inc_filtered(event.chain_id, &self.config.source);
                    tracing::debug!(event = %event.id, chain_id = event.chain_id, "message filtered");
                    continue;
                }

                self.metrics.inc_unfiltered(event.chain_id, &self.config.source);
                in_flight.acquire();
                let message = QueueMessage {
                    event,
                    message_id: raw.message_id,
                    receipt_handle: raw.receipt_handle,
                    expires_at,
                    service: self.service.clone(),
                    in_flight: in_flight.clone(),
                    settled: false,
                };

                let sent = tokio::select! {
                    _ = shutdown.changed() => None,
                    r = tx.send(message) => Some(r.is_ok()),
                };
                match sent {
                    Some(true) => {}
                    Some(false) => {
                        tracing::info!("output channel closed, stopping queue consumer");
                        return;
                    }
                    None => return,
                }
            }

            // barrier: the next batch waits for every forwarded message to settle
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = in_flight.wait_idle() => {}
            }
        }

        tracing::info!(source = %self.config.source, "queue consumer stopped");
    }
}
