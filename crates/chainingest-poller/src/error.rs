//! Error types for the polling pipeline.

use chainingest_core::RepositoryError;
use thiserror::Error;

/// Errors that end one poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("sink error: {0}")]
    Sink(String),
}

impl PollError {
    /// Returns `true` if the chain's breaker rejected the call; the next
    /// cycle is expected to retry.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_circuit_open())
    }
}
