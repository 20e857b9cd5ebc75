//! The poll loop: walks a cursor over the chain in bounded ranges.
//!
//! Each cycle:
//!   - resolve the head at the configured finality
//!   - take `[cursor + 1, min(cursor + batch, head, to_block)]`
//!   - run the use case over that range and hand the items to the sink
//!   - advance the cursor only once the sink accepted them
//!
//! The loop sleeps `interval` when caught up or after an error, stops once
//! `to_block` is processed, and stops on shutdown, abandoning any cycle in
//! flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use chainingest_core::{BlockTag, ChainBlockRepository, IngestMetrics, NoopMetrics, Transaction};

use crate::error::PollError;
use crate::get_logs::{EnrichedLog, GetLogs, LogsOptions};
use crate::get_transactions::{GetTransactions, TransactionsOptions};

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self { from_block, to_block }
    }

    /// `from_block > to_block`.
    pub fn is_empty(&self) -> bool {
        self.from_block > self.to_block
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

/// Produces the records of one block range.
#[async_trait]
pub trait RangeSource: Send + Sync {
    type Item: Send + 'static;

    async fn fetch(&self, range: BlockRange) -> Result<Vec<Self::Item>, PollError>;
}

/// Receives what a poller produced.
#[async_trait]
pub trait Sink<T: Send + 'static>: Send + Sync {
    async fn publish(&self, poller: &str, items: Vec<T>) -> Result<(), PollError>;
}

/// [`GetLogs`] bound to its options.
pub struct LogsSource<R: ?Sized> {
    use_case: GetLogs<R>,
    options: LogsOptions,
}

impl<R: ChainBlockRepository + ?Sized> LogsSource<R> {
    pub fn new(repository: Arc<R>, options: LogsOptions) -> Self {
        Self {
            use_case: GetLogs::new(repository),
            options,
        }
    }
}

#[async_trait]
impl<R: ChainBlockRepository + ?Sized> RangeSource for LogsSource<R> {
    type Item = EnrichedLog;

    async fn fetch(&self, range: BlockRange) -> Result<Vec<EnrichedLog>, PollError> {
        self.use_case.execute(range, &self.options).await
    }
}

/// [`GetTransactions`] bound to its options.
pub struct TransactionsSource<R: ?Sized> {
    use_case: GetTransactions<R>,
    options: TransactionsOptions,
}

impl<R: ChainBlockRepository + ?Sized> TransactionsSource<R> {
    pub fn new(repository: Arc<R>, options: TransactionsOptions) -> Self {
        Self {
            use_case: GetTransactions::new(repository),
            options,
        }
    }
}

#[async_trait]
impl<R: ChainBlockRepository + ?Sized> RangeSource for TransactionsSource<R> {
    type Item = Transaction;

    async fn fetch(&self, range: BlockRange) -> Result<Vec<Transaction>, PollError> {
        self.use_case.execute(range, &self.options).await
    }
}

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub id: String,
    pub chain: String,
    /// Head resolution; never a block number.
    pub finality: BlockTag,
    /// First block to process; `None` starts at the head seen on the first cycle.
    pub from_block: Option<u64>,
    /// Last block to process; `None` follows the chain forever.
    pub to_block: Option<u64>,
    /// Maximum blocks per cycle.
    pub block_batch_size: u64,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            chain: "ethereum".into(),
            finality: BlockTag::Finalized,
            from_block: None,
            to_block: None,
            block_batch_size: 100,
            interval: Duration::from_secs(5),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A range was processed; `caught_up` when it reached the current target.
    Progress {
        range: BlockRange,
        items: usize,
        caught_up: bool,
    },
    /// Nothing new yet.
    Idle,
    /// `to_block` has been processed.
    Finished,
}

/// Drives one [`RangeSource`] over a chain.
pub struct Poller<S: RangeSource> {
    config: PollerConfig,
    head: Arc<dyn ChainBlockRepository>,
    source: S,
    sink: Arc<dyn Sink<S::Item>>,
    metrics: Arc<dyn IngestMetrics>,
    /// Last processed block.
    cursor: Option<u64>,
}

impl<S: RangeSource> Poller<S> {
    pub fn new(
        config: PollerConfig,
        head: Arc<dyn ChainBlockRepository>,
        source: S,
        sink: Arc<dyn Sink<S::Item>>,
    ) -> Self {
        let cursor = config.from_block.and_then(|b| b.checked_sub(1));
        Self {
            config,
            head,
            source,
            sink,
            metrics: Arc::new(NoopMetrics),
            cursor,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Last processed block, if any.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    fn next_start(&self, head: u64) -> u64 {
        match self.cursor {
            Some(c) => c + 1,
            None => self.config.from_block.unwrap_or(head),
        }
    }

    /// Run a single cycle.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome, PollError> {
        if let (Some(to), Some(c)) = (self.config.to_block, self.cursor) {
            if c >= to {
                return Ok(CycleOutcome::Finished);
            }
        }

        let chain = self.config.chain.as_str();
        let head = self.head.get_block_height(chain, self.config.finality).await?;
        let target = self.config.to_block.map_or(head, |to| to.min(head));
        let start = self.next_start(head);
        if start > target {
            tracing::debug!(poller = %self.config.id, start, head, "no new blocks");
            return Ok(CycleOutcome::Idle);
        }

        let batch = self.config.block_batch_size.max(1);
        let end = start.saturating_add(batch - 1).min(target);
        let range = BlockRange::new(start, end);

        let items = self.source.fetch(range).await?;
        let count = items.len();
        self.sink.publish(&self.config.id, items).await?;
        self.cursor = Some(end);
        self.metrics.record_poll_cycle(&self.config.id, count);

        tracing::info!(poller = %self.config.id, chain, %range, items = count, head, "range processed");
        Ok(CycleOutcome::Progress {
            range,
            items: count,
            caught_up: end >= target,
        })
    }

    /// Poll until `to_block` is done or `shutdown` flips to `true` (or its
    /// sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poller = %self.config.id,
            chain = %self.config.chain,
            from = ?self.config.from_block,
            to = ?self.config.to_block,
            "poller started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                res = self.poll_once() => res,
                _ = shutdown.changed() => break,
            };

            let pause = match outcome {
                Ok(CycleOutcome::Finished) => {
                    tracing::info!(poller = %self.config.id, "reached to_block");
                    break;
                }
                Ok(CycleOutcome::Progress { caught_up: false, .. }) => false,
                Ok(_) => true,
                Err(e) if e.is_circuit_open() => {
                    tracing::warn!(poller = %self.config.id, error = %e, "circuit open, retrying next cycle");
                    true
                }
                Err(e) => {
                    tracing::error!(poller = %self.config.id, error = %e, "poll cycle failed");
                    true
                }
            };

            if pause {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
        tracing::info!(poller = %self.config.id, cursor = ?self.cursor, "poller stopped");
    }
}
