//! Error types for the queue consumer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue service rejected or failed a call.
    #[error("queue service error: {0}")]
    Service(String),

    /// A message body is not a valid envelope or event.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
