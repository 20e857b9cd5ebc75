//! chainingest-core — foundation traits and types for ChainIngest.
//!
//! # Overview
//!
//! ChainIngest polls heterogeneous blockchains (EVM, Solana, Near) over
//! JSON-RPC and drains a managed queue of previously published chain
//! events. The core crate defines:
//!
//! - [`RpcTransport`] — the async trait every transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types
//! - [`TransportError`] / [`RepositoryError`] — structured error types
//! - [`types`] — the chain-agnostic domain model
//! - [`ChainBlockRepository`] — the per-chain-family capability interface
//! - [`pool`] module — health-aware provider pool
//! - [`policy`] module — retry, circuit breaker, rate limiter
//! - [`RateLimitedRepository`] — resilience decorator over any repository
//! - [`IngestMetrics`] — injected metrics sink
//!
//! ```text
//! use case → RateLimitedRepository → ChainBlockRepository → ProviderPool → RpcTransport
//! ```

pub mod error;
pub mod guarded;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod repository;
pub mod request;
pub mod transport;
pub mod types;

pub use error::{RepositoryError, TransportError};
pub use guarded::{RateLimitedRepository, ResilienceConfig};
pub use metrics::{CountingMetrics, IngestMetrics, NoopMetrics};
pub use pool::{ProviderHandle, ProviderPool, ProviderPoolConfig};
pub use repository::{BlockMap, ChainBlockRepository, RECEIPT_BATCH_SIZE};
pub use request::{JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use transport::{HealthStatus, RpcTransport};
pub use types::{
    Block, BlockTag, Log, LogFilter, ReceiptTransaction, TopicFilter, Transaction, TxRef, TxStatus,
};
