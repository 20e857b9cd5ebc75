//! OpenTelemetry-backed ingestion metrics.
//!
//! Instruments are created from whatever meter the process installed; with
//! no provider registered the global meter is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use chainingest_core::IngestMetrics;

/// Counters and histograms for pollers, the resilience decorator and the
/// queue consumer.
#[derive(Clone)]
pub struct OtelMetrics {
    messages_consumed: Counter<u64>,
    messages_filtered: Counter<u64>,
    messages_unfiltered: Counter<u64>,
    rpc_calls: Counter<u64>,
    poll_cycles: Counter<u64>,
    poll_items: Histogram<u64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            messages_consumed: meter
                .u64_counter("chainingest.messages_consumed")
                .with_description("Queue messages decoded")
                .init(),
            messages_filtered: meter
                .u64_counter("chainingest.messages_filtered")
                .with_description("Queue messages rejected by the filter and deleted")
                .init(),
            messages_unfiltered: meter
                .u64_counter("chainingest.messages_unfiltered")
                .with_description("Queue messages forwarded to the worker")
                .init(),
            rpc_calls: meter
                .u64_counter("chainingest.rpc_calls")
                .with_description("Repository calls made through the resilience decorator")
                .init(),
            poll_cycles: meter
                .u64_counter("chainingest.poll_cycles")
                .with_description("Completed poll cycles")
                .init(),
            poll_items: meter
                .u64_histogram("chainingest.poll_items")
                .with_description("Records emitted per poll cycle")
                .init(),
        }
    }
}

fn queue_attributes(chain_id: u64, source: &str) -> [KeyValue; 2] {
    [
        KeyValue::new("chain_id", chain_id as i64),
        KeyValue::new("source", source.to_string()),
    ]
}

fn rpc_attributes(chain: &str, method: &str, ok: bool) -> [KeyValue; 3] {
    [
        KeyValue::new("chain", chain.to_string()),
        KeyValue::new("method", method.to_string()),
        KeyValue::new("outcome", if ok { "ok" } else { "error" }),
    ]
}

impl IngestMetrics for OtelMetrics {
    fn inc_consumed(&self, chain_id: u64, source: &str) {
        self.messages_consumed.add(1, &queue_attributes(chain_id, source));
    }

    fn inc_filtered(&self, chain_id: u64, source: &str) {
        self.messages_filtered.add(1, &queue_attributes(chain_id, source));
    }

    fn inc_unfiltered(&self, chain_id: u64, source: &str) {
        self.messages_unfiltered.add(1, &queue_attributes(chain_id, source));
    }

    fn record_rpc_call(&self, chain: &str, method: &str, ok: bool) {
        self.rpc_calls.add(1, &rpc_attributes(chain, method, ok));
    }

    fn record_poll_cycle(&self, poller: &str, items: usize) {
        let attributes = [KeyValue::new("poller", poller.to_string())];
        self.poll_cycles.add(1, &attributes);
        self.poll_items.record(items as u64, &attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pairs(attributes: &[KeyValue]) -> Vec<(String, String)> {
        attributes
            .iter()
            .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
            .collect()
    }

    #[test]
    fn queue_counters_are_labelled_by_chain_and_source() {
        assert_eq!(
            pairs(&queue_attributes(2, "sqs")),
            vec![("chain_id".into(), "2".into()), ("source".into(), "sqs".into())]
        );
    }

    #[test]
    fn rpc_calls_are_labelled_by_outcome() {
        let labels = pairs(&rpc_attributes("ethereum", "get_blocks", false));
        assert_eq!(labels[0], ("chain".into(), "ethereum".into()));
        assert_eq!(labels[1], ("method".into(), "get_blocks".into()));
        assert_eq!(labels[2], ("outcome".into(), "error".into()));
    }

    #[test]
    fn records_through_the_global_meter() {
        let metrics: Arc<dyn IngestMetrics> =
            Arc::new(OtelMetrics::new(&opentelemetry::global::meter("chainingest-test")));
        metrics.inc_consumed(2, "sqs");
        metrics.inc_filtered(2, "sqs");
        metrics.inc_unfiltered(2, "sqs");
        metrics.record_rpc_call("ethereum", "get_blocks", true);
        metrics.record_poll_cycle("eth-logs", 4);
    }
}
