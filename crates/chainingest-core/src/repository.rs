//! The per-chain-family repository capability.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::types::{Block, BlockTag, Log, LogFilter, ReceiptTransaction, TxRef};

/// Blocks keyed by [`Block::map_key`] (hash, or hex number when degraded).
pub type BlockMap = HashMap<String, Block>;

/// Maximum number of receipt lookups sent in one batched network call.
pub const RECEIPT_BATCH_SIZE: usize = 10;

/// Fetches blocks, logs and receipts from one chain family's JSON-RPC
/// dialect and normalizes them into the shared domain model.
///
/// One implementation exists per family (EVM, Solana, Near); each serves
/// every chain it has a provider pool for, selected by the `chain` argument.
/// Resilience is layered on from outside by
/// [`RateLimitedRepository`](crate::RateLimitedRepository).
#[async_trait]
pub trait ChainBlockRepository: Send + Sync + 'static {
    /// Current height at the given finality.
    async fn get_block_height(&self, chain: &str, finality: BlockTag) -> Result<u64, RepositoryError>;

    /// Fetch many blocks in a single batched round trip.
    ///
    /// An empty set returns an empty map without touching the network.
    /// Blocks the provider cannot serve come back degraded rather than
    /// failing the call.
    async fn get_blocks(
        &self,
        chain: &str,
        numbers: &BTreeSet<u64>,
        include_transactions: bool,
    ) -> Result<BlockMap, RepositoryError>;

    /// Fetch one block; fails if hash, number or timestamp are missing.
    async fn get_block(
        &self,
        chain: &str,
        block: BlockTag,
        include_transactions: bool,
    ) -> Result<Block, RepositoryError>;

    /// Logs matching `filter`, every one tagged with the chain's id.
    async fn get_filtered_logs(&self, chain: &str, filter: &LogFilter) -> Result<Vec<Log>, RepositoryError>;

    /// Receipts keyed by transaction hash, fetched in batches of
    /// [`RECEIPT_BATCH_SIZE`]. Any unparseable receipt fails the whole call.
    async fn get_transaction_receipts(
        &self,
        chain: &str,
        txs: &BTreeSet<TxRef>,
    ) -> Result<HashMap<String, ReceiptTransaction>, RepositoryError>;
}
