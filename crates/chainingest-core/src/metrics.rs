//! Injected metrics sink.
//!
//! Components receive an `Arc<dyn IngestMetrics>`. The binary forwards to
//! OpenTelemetry, [`NoopMetrics`] discards everything and [`CountingMetrics`]
//! keeps in-process counters that tests can read back.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Counters emitted by pollers, the resilience decorator and the queue consumer.
pub trait IngestMetrics: Send + Sync {
    /// A queue message was decoded.
    fn inc_consumed(&self, chain_id: u64, source: &str);
    /// A decoded queue message was rejected by the filter and deleted.
    fn inc_filtered(&self, chain_id: u64, source: &str);
    /// A decoded queue message passed the filter and was forwarded.
    fn inc_unfiltered(&self, chain_id: u64, source: &str);
    /// One delegate call went through the resilience decorator.
    fn record_rpc_call(&self, chain: &str, method: &str, ok: bool);
    /// A poll cycle finished and produced `items` records.
    fn record_poll_cycle(&self, poller: &str, items: usize);
}

/// Discards every metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl IngestMetrics for NoopMetrics {
    fn inc_consumed(&self, _chain_id: u64, _source: &str) {}
    fn inc_filtered(&self, _chain_id: u64, _source: &str) {}
    fn inc_unfiltered(&self, _chain_id: u64, _source: &str) {}
    fn record_rpc_call(&self, _chain: &str, _method: &str, _ok: bool) {}
    fn record_poll_cycle(&self, _poller: &str, _items: usize) {}
}

/// In-memory counters keyed by `"<name>:<label>..."`.
///
/// | call                          | key(s)                                     |
/// |-------------------------------|--------------------------------------------|
/// | `inc_consumed(2, "sqs")`      | `consumed:2`                               |
/// | `inc_filtered(2, "sqs")`      | `filtered:2`                               |
/// | `inc_unfiltered(2, "sqs")`    | `unfiltered:2`                             |
/// | `record_rpc_call(c, m, ok)`   | `rpc_ok:c:m` or `rpc_err:c:m`              |
/// | `record_poll_cycle(p, n)`     | `poll_cycles:p` (+1), `poll_items:p` (+n)  |
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl CountingMetrics {
    fn add(&self, key: String, n: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(key).or_insert(0) += n;
    }

    /// Current value of a counter (0 if never incremented).
    pub fn get(&self, key: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(key).copied().unwrap_or(0)
    }

    /// Copy of every counter, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IngestMetrics for CountingMetrics {
    fn inc_consumed(&self, chain_id: u64, _source: &str) {
        self.add(format!("consumed:{chain_id}"), 1);
    }

    fn inc_filtered(&self, chain_id: u64, _source: &str) {
        self.add(format!("filtered:{chain_id}"), 1);
    }

    fn inc_unfiltered(&self, chain_id: u64, _source: &str) {
        self.add(format!("unfiltered:{chain_id}"), 1);
    }

    fn record_rpc_call(&self, chain: &str, method: &str, ok: bool) {
        let outcome = if ok { "rpc_ok" } else { "rpc_err" };
        self.add(format!("{outcome}:{chain}:{method}"), 1);
    }

    fn record_poll_cycle(&self, poller: &str, items: usize) {
        self.add(format!("poll_cycles:{poller}"), 1);
        self.add(format!("poll_items:{poller}"), items as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_label() {
        let m = CountingMetrics::default();
        m.inc_filtered(2, "sqs");
        m.inc_filtered(2, "sqs");
        m.inc_unfiltered(5, "sqs");
        m.record_rpc_call("ethereum", "get_blocks", false);
        m.record_poll_cycle("p1", 7);
        m.record_poll_cycle("p1", 3);

        assert_eq!(m.get("filtered:2"), 2);
        assert_eq!(m.get("unfiltered:5"), 1);
        assert_eq!(m.get("consumed:2"), 0);
        assert_eq!(m.get("rpc_err:ethereum:get_blocks"), 1);
        assert_eq!(m.get("poll_cycles:p1"), 2);
        assert_eq!(m.get("poll_items:p1"), 10);
        assert_eq!(m.snapshot().len(), 5);
    }
}
