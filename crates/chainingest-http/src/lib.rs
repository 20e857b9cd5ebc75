//! chainingest-http — HTTP JSON-RPC transport for ChainIngest.
//!
//! Provides [`HttpRpcClient`], a `reqwest`-based [`RpcTransport`] with a
//! request timeout, exponential-backoff retries and true HTTP batching.
//!
//! [`RpcTransport`]: chainingest_core::RpcTransport

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient};
