//! In-process [`QueueService`] with visibility leases and redelivery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::consumer::{QueueService, RawMessage};
use crate::error::QueueError;
use crate::event::{ChainEvent, NotificationEnvelope};

#[derive(Debug, Clone)]
struct Stored {
    message_id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct State {
    visible: VecDeque<Stored>,
    /// receipt handle → (message, lease deadline)
    leased: HashMap<String, (Stored, Instant)>,
    deleted: Vec<String>,
}

impl State {
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, (_, until))| *until <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some((stored, _)) = self.leased.remove(&handle) {
                self.visible.push_back(stored);
            }
        }
    }

    fn next_lease_expiry(&self) -> Option<Instant> {
        self.leased.values().map(|(_, until)| *until).min()
    }
}

/// A queue held in memory. Received messages are leased for the visibility
/// timeout and become visible again unless deleted before it runs out.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    available: Notify,
    visibility: Duration,
    wait_time: Duration,
    batch_size: usize,
    next_id: AtomicU64,
    receive_calls: AtomicUsize,
}

impl InMemoryQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Notify::new(),
            visibility,
            wait_time: Duration::from_secs(1),
            batch_size: 10,
            next_id: AtomicU64::new(1),
            receive_calls: AtomicUsize::new(0),
        }
    }

    /// How long `receive` waits for a message before returning empty.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a raw body and return its message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let message_id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state().visible.push_back(Stored {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
        });
        self.available.notify_one();
        message_id
    }

    /// Enqueue `event` wrapped in a notification envelope.
    pub fn push_event(&self, event: &ChainEvent) -> Result<String, QueueError> {
        let envelope = NotificationEnvelope::wrap(format!("env-{}", event.id), event)?;
        Ok(self.push(serde_json::to_string(&envelope)?))
    }

    /// Number of `receive` calls so far.
    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// Message ids deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn visible_len(&self) -> usize {
        self.state().visible.len()
    }

    /// Messages currently leased to a consumer.
    pub fn in_flight_len(&self) -> usize {
        self.state().leased.len()
    }

    fn take_batch(&self, now: Instant) -> (Vec<RawMessage>, Option<Instant>) {
        let mut state = self.state();
        state.reclaim_expired(now);
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let Some(mut stored) = state.visible.pop_front() else {
                break;
            };
            stored.receive_count += 1;
            let receipt_handle = format!("{}#{}", stored.message_id, stored.receive_count);
            batch.push(RawMessage {
                message_id: stored.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: stored.body.clone(),
            });
            state.leased.insert(receipt_handle, (stored, now + self.visibility));
        }
        (batch, state.next_lease_expiry())
    }
}

#[async_trait]
impl QueueService for InMemoryQueue {
    async fn receive(&self) -> Result<Vec<RawMessage>, QueueError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + self.wait_time;
        loop {
            let now = Instant::now();
            let (batch, next_expiry) = self.take_batch(now);
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            let wake = next_expiry.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = self.available.notified() => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        match state.leased.remove(receipt_handle) {
            Some((stored, _)) => {
                state.deleted.push(stored.message_id);
                Ok(())
            }
            None => Err(QueueError::Service(format!("unknown or expired receipt handle {receipt_handle}"))),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility
    }
}
