//! chainingest-queue — drain a managed queue of published chain events.
//!
//! ```text
//! QueueService → decode envelope → filter ─ skip ──→ delete
//!                                         └ accept → bounded channel → worker (ack | fail)
//! ```
//!
//! The [`QueueConsumer`] keeps at most one fetched batch outstanding: after
//! dispatching a batch it waits until every forwarded [`QueueMessage`] was
//! acked, failed or dropped before it receives again. Delivery is
//! at-least-once; workers must be idempotent.

pub mod consumer;
pub mod error;
pub mod event;
pub mod memory;

pub use consumer::{
    accept_chains, ConsumeDecision, ConsumeFilter, QueueConsumer, QueueConsumerConfig, QueueMessage,
    QueueService, RawMessage,
};
pub use error::QueueError;
pub use event::{decode_message, ChainEvent, NotificationEnvelope};
pub use memory::InMemoryQueue;
