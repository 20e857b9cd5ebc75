//! GetLogs: one filtered log query per range, enriched with block time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use chainingest_core::{ChainBlockRepository, Log, LogFilter};

use crate::error::PollError;
use crate::poller::BlockRange;

/// Filter and chain metadata for [`GetLogs`].
#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub addresses: Vec<String>,
    /// Alternatives for the first topic position; empty matches any.
    pub topics: Vec<String>,
    pub chain: String,
    pub chain_id: u64,
}

/// A log plus the time and chain it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedLog {
    pub log: Log,
    pub block_timestamp: i64,
    pub chain: String,
    pub chain_id: u64,
}

pub struct GetLogs<R: ?Sized> {
    repository: Arc<R>,
}

impl<R: ChainBlockRepository + ?Sized> GetLogs<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn execute(&self, range: BlockRange, opts: &LogsOptions) -> Result<Vec<EnrichedLog>, PollError> {
        if range.is_empty() {
            return Ok(vec![]);
        }
        let chain = opts.chain.as_str();

        let mut filter = LogFilter::new(range.from_block, range.to_block);
        filter.addresses = opts.addresses.clone();
        if !opts.topics.is_empty() {
            filter = filter.topic(opts.topics.clone());
        }

        let mut logs: Vec<Log> = self
            .repository
            .get_filtered_logs(chain, &filter)
            .await?
            .into_iter()
            .filter(|log| {
                if log.removed {
                    tracing::warn!(chain, tx = %log.transaction_hash, "dropping removed log");
                    return false;
                }
                if !filter.contains_block(log.block_number) {
                    tracing::warn!(
                        chain,
                        block = log.block_number,
                        from = range.from_block,
                        to = range.to_block,
                        "dropping log outside requested range"
                    );
                    return false;
                }
                true
            })
            .collect();
        if logs.is_empty() {
            return Ok(vec![]);
        }
        logs.sort_by_key(|l| (l.block_number, l.log_index));

        let numbers: BTreeSet<u64> = logs.iter().map(|l| l.block_number).collect();
        let timestamps: HashMap<u64, i64> = self
            .repository
            .get_blocks(chain, &numbers, false)
            .await?
            .into_values()
            .map(|b| (b.number, b.timestamp))
            .collect();

        let enriched: Vec<EnrichedLog> = logs
            .into_iter()
            .map(|log| {
                let block_timestamp = timestamps.get(&log.block_number).copied().unwrap_or_else(|| {
                    tracing::warn!(chain, block = log.block_number, "no block time for log");
                    0
                });
                EnrichedLog {
                    log,
                    block_timestamp,
                    chain: opts.chain.clone(),
                    chain_id: opts.chain_id,
                }
            })
            .collect();
        tracing::debug!(
            chain,
            from = range.from_block,
            to = range.to_block,
            logs = enriched.len(),
            "logs fetched"
        );
        Ok(enriched)
    }
}
