//! Transport- and repository-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to an RPC endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Rate limit exceeded; the caller should back off.
    #[error("Rate limit exceeded (provider: {provider})")]
    RateLimited { provider: String },

    /// The pool has no providers at all.
    #[error("All providers unavailable")]
    AllProvidersDown,

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response body could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Errors surfaced by chain repositories and the resilience decorator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The transport failed after exhausting its own retries.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The upstream answered with something we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No provider pool or settings are registered for this chain.
    #[error("unknown chain: {0}")]
    UnknownChain(String),

    /// The chain's circuit breaker is open; the delegate was not invoked.
    #[error("circuit breaker open for chain {chain}")]
    CircuitOpen { chain: String },

    /// The chain's rate limit was exhausted on every attempt.
    #[error("rate limit exceeded for chain {chain}")]
    RateLimited { chain: String },

    /// The caller passed arguments this chain family cannot serve.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RepositoryError {
    /// Shorthand for a [`RepositoryError::Protocol`] error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is the decorator's fail-fast rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
