//! GetTransactions: scan blocks, keep transactions touching the configured
//! addresses whose receipts emitted a configured topic.

use std::collections::BTreeSet;
use std::sync::Arc;

use chainingest_core::{ChainBlockRepository, Transaction, TxRef};

use crate::error::PollError;
use crate::poller::BlockRange;

/// Filter and chain metadata for [`GetTransactions`].
#[derive(Debug, Clone, Default)]
pub struct TransactionsOptions {
    /// Matched case-insensitively against `from` and `to`.
    pub addresses: Vec<String>,
    /// A transaction needs at least one receipt log carrying one of these.
    pub topics: Vec<String>,
    pub chain: String,
    pub chain_id: u64,
    pub environment: Option<String>,
}

pub struct GetTransactions<R: ?Sized> {
    repository: Arc<R>,
}

impl<R: ChainBlockRepository + ?Sized> GetTransactions<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Blocks are fetched one at a time with full bodies; receipts of the
    /// address-matched transactions of a block are fetched in one call.
    pub async fn execute(
        &self,
        range: BlockRange,
        opts: &TransactionsOptions,
    ) -> Result<Vec<Transaction>, PollError> {
        if range.is_empty() {
            return Ok(vec![]);
        }
        let chain = opts.chain.as_str();
        if opts.topics.is_empty() {
            tracing::warn!(chain, "no topics configured, no transaction can match");
            return Ok(vec![]);
        }
        let topics: Vec<&str> = opts.topics.iter().map(String::as_str).collect();

        let mut out = Vec::new();
        for number in range.from_block..=range.to_block {
            let blocks = self
                .repository
                .get_blocks(chain, &BTreeSet::from([number]), true)
                .await?;
            let Some(block) = blocks.into_values().next() else {
                continue;
            };
            if block.is_degraded() {
                tracing::debug!(chain, block = number, "skipping placeholder block");
                continue;
            }

            let candidates: Vec<Transaction> = block
                .transactions
                .unwrap_or_default()
                .into_iter()
                .filter(|tx| tx.involves_any(&opts.addresses))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let refs: BTreeSet<TxRef> = candidates.iter().map(TxRef::from).collect();
            let receipts = self.repository.get_transaction_receipts(chain, &refs).await?;

            for mut tx in candidates {
                let Some(receipt) = receipts.get(&tx.hash) else {
                    tracing::debug!(chain, tx = %tx.hash, "no receipt, skipping");
                    continue;
                };
                if !receipt.logs.iter().any(|l| l.has_any_topic(&topics)) {
                    continue;
                }
                tx.merge_receipt(receipt);
                tx.enrich(block.timestamp, chain, opts.chain_id, opts.environment.as_deref());
                out.push(tx);
            }
        }

        tracing::debug!(
            chain,
            from = range.from_block,
            to = range.to_block,
            matched = out.len(),
            "transactions scanned"
        );
        Ok(out)
    }
}
