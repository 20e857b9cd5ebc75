//! chainingest-poller — turn block ranges into filtered, enriched records.
//!
//! - [`GetLogs`] — one log query per range, logs enriched with block time
//! - [`GetTransactions`] — per-block scan, address filter, receipt topic filter
//! - [`Poller`] — drives a use case over a growing chain: resolves the head,
//!   walks the cursor forward in bounded ranges and hands results to a [`Sink`]

pub mod error;
pub mod get_logs;
pub mod get_transactions;
pub mod poller;

#[cfg(test)]
mod testing;

pub use error::PollError;
pub use get_logs::{EnrichedLog, GetLogs, LogsOptions};
pub use get_transactions::{GetTransactions, TransactionsOptions};
pub use poller::{BlockRange, CycleOutcome, LogsSource, Poller, PollerConfig, RangeSource, Sink, TransactionsSource};
