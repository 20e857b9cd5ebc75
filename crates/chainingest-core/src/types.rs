//! Chain-agnostic domain model shared by every chain family.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::to_hex;

// ─── Block ────────────────────────────────────────────────────────────────────

/// A chain block as normalized by a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (slot on Solana, height on Near).
    pub number: u64,
    /// Block hash; empty for a degraded placeholder.
    pub hash: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Transactions, present only when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
}

impl Block {
    /// Placeholder for a block the provider could not serve.
    ///
    /// Carries the requested number, an empty hash and the current wall-clock
    /// time so range iteration can move past flaky nodes.
    pub fn degraded(number: u64) -> Self {
        Self {
            number,
            hash: String::new(),
            timestamp: chrono::Utc::now().timestamp(),
            transactions: None,
        }
    }

    /// Returns `true` if this block is a synthesized placeholder.
    pub fn is_degraded(&self) -> bool {
        self.hash.is_empty()
    }

    /// Key under which this block is stored in a [`crate::BlockMap`]: the
    /// hash, or the hex-encoded number for degraded blocks.
    pub fn map_key(&self) -> String {
        if self.is_degraded() {
            to_hex(self.number)
        } else {
            self.hash.clone()
        }
    }
}

// ─── BlockTag ─────────────────────────────────────────────────────────────────

/// A block selector: an explicit number or a finality tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
    Number(u64),
    Latest,
    Safe,
    Finalized,
}

impl BlockTag {
    /// EVM encoding: hex quantity or tag string.
    pub fn to_evm_param(&self) -> Value {
        match self {
            Self::Number(n) => Value::String(to_hex(*n)),
            other => Value::String(other.to_string()),
        }
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Latest => write!(f, "latest"),
            Self::Safe => write!(f, "safe"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// One topic position: a single value or a set of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicFilter {
    Single(String),
    AnyOf(Vec<String>),
}

impl TopicFilter {
    fn values(&self) -> &[String] {
        match self {
            Self::Single(t) => std::slice::from_ref(t),
            Self::AnyOf(ts) => ts,
        }
    }
}

/// A log query over an inclusive block range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// Emitting addresses; empty matches every address.
    pub addresses: Vec<String>,
    /// Positional topics; `None` is a wildcard position.
    pub topics: Vec<Option<TopicFilter>>,
    /// First block, inclusive.
    pub from_block: u64,
    /// Last block, inclusive.
    pub to_block: u64,
}

impl LogFilter {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Append a topic position accepting any of `alternatives`.
    pub fn topic(mut self, alternatives: Vec<String>) -> Self {
        let position = match alternatives.len() {
            0 => None,
            1 => alternatives.into_iter().next().map(TopicFilter::Single),
            _ => Some(TopicFilter::AnyOf(alternatives)),
        };
        self.topics.push(position);
        self
    }

    /// `from_block > to_block`; callers must treat this as an empty result.
    pub fn is_empty_range(&self) -> bool {
        self.from_block > self.to_block
    }

    pub fn contains_block(&self, number: u64) -> bool {
        (self.from_block..=self.to_block).contains(&number)
    }

    /// Every topic value mentioned in any position.
    pub fn flat_topics(&self) -> Vec<&str> {
        self.topics
            .iter()
            .flatten()
            .flat_map(|t| t.values().iter().map(String::as_str))
            .collect()
    }

    /// Returns `true` if `address` is covered by this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// A single event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    /// Canonical decimal string.
    pub transaction_index: String,
    pub log_index: u64,
    pub removed: bool,
    /// Numeric identifier of the chain that produced the log.
    pub chain_id: u64,
}

impl Log {
    /// Returns `true` if any of this log's topics is in `topics`
    /// (case-insensitive).
    pub fn has_any_topic(&self, topics: &[&str]) -> bool {
        self.topics
            .iter()
            .any(|t| topics.iter().any(|c| c.eq_ignore_ascii_case(t)))
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// Execution outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Reverted,
    Unknown,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Reverted => write!(f, "reverted"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A chain transaction.
///
/// Built in two passes: the raw fields come from the block, then
/// [`Transaction::merge_receipt`] and [`Transaction::enrich`] fill in the
/// execution outcome and chain metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub from: String,
    pub to: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub transaction_index: String,
    #[serde(default)]
    pub status: Option<TxStatus>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub environment: Option<String>,
}

impl Transaction {
    /// Returns `true` if `from` or `to` equals one of `addresses`
    /// (case-insensitive).
    pub fn involves_any(&self, addresses: &[String]) -> bool {
        addresses.iter().any(|a| {
            a.eq_ignore_ascii_case(&self.from)
                || self.to.as_deref().is_some_and(|to| a.eq_ignore_ascii_case(to))
        })
    }

    /// Second pass: take status and logs from the receipt.
    ///
    /// Logs are stamped with this transaction's block and index, which some
    /// families only know from the block the transaction was found in.
    pub fn merge_receipt(&mut self, receipt: &ReceiptTransaction) {
        self.status = Some(receipt.status);
        self.logs = receipt
            .logs
            .iter()
            .cloned()
            .map(|mut log| {
                log.block_number = self.block_number;
                log.block_hash.clone_from(&self.block_hash);
                log.transaction_index.clone_from(&self.transaction_index);
                log
            })
            .collect();
    }

    /// Attach block time and chain metadata.
    pub fn enrich(
        &mut self,
        timestamp: i64,
        chain: &str,
        chain_id: u64,
        environment: Option<&str>,
    ) {
        self.timestamp = Some(timestamp);
        self.chain = Some(chain.to_string());
        self.chain_id = Some(chain_id);
        self.environment = environment.map(str::to_string);
    }
}

/// A transaction's execution receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptTransaction {
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub from: String,
    pub to: Option<String>,
    pub status: TxStatus,
    pub logs: Vec<Log>,
    pub gas_used: Option<u64>,
}

/// Reference used to look up a receipt.
///
/// `sender` is only consulted by chain families whose RPC requires it to
/// locate the transaction (Near).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub hash: String,
    pub sender: Option<String>,
}

impl TxRef {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            sender: None,
        }
    }

    pub fn with_sender(hash: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            sender: Some(sender.into()),
        }
    }
}

impl From<&str> for TxRef {
    fn from(hash: &str) -> Self {
        Self::new(hash)
    }
}

impl From<String> for TxRef {
    fn from(hash: String) -> Self {
        Self::new(hash)
    }
}

impl From<&Transaction> for TxRef {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash.clone(),
            sender: Some(tx.from.clone()),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(from: &str, to: Option<&str>) -> Transaction {
        Transaction {
            hash: "0xabc".into(),
            block_number: 1,
            block_hash: "0x1".into(),
            from: from.into(),
            to: to.map(str::to_string),
            input: "0x".into(),
            value: "0x0".into(),
            transaction_index: "0".into(),
            status: None,
            timestamp: None,
            logs: vec![],
            chain: None,
            chain_id: None,
            environment: None,
        }
    }

    #[test]
    fn degraded_block_is_keyed_by_number() {
        let b = Block::degraded(26);
        assert!(b.is_degraded());
        assert_eq!(b.map_key(), "0x1a");
        assert!(b.timestamp > 0);
    }

    #[test]
    fn filter_range_semantics() {
        let f = LogFilter::new(10, 5);
        assert!(f.is_empty_range());
        let f = LogFilter::new(100, 200);
        assert!(f.contains_block(100));
        assert!(f.contains_block(200));
        assert!(!f.contains_block(201));
    }

    #[test]
    fn topic_positions_serialize_like_eth_get_logs() {
        let f = LogFilter::new(1, 2)
            .topic(vec!["0xaa".into()])
            .topic(vec![])
            .topic(vec!["0xbb".into(), "0xcc".into()]);
        let json = serde_json::to_value(&f.topics).unwrap();
        assert_eq!(json, serde_json::json!(["0xaa", null, ["0xbb", "0xcc"]]));
        assert_eq!(f.flat_topics(), vec!["0xaa", "0xbb", "0xcc"]);
    }

    #[test]
    fn involves_is_case_insensitive() {
        let t = tx("0xSENDER", Some("0xAbC"));
        assert!(t.involves_any(&["0xabc".into()]));
        assert!(t.involves_any(&["0xsender".into()]));
        assert!(!t.involves_any(&["0xdef".into()]));
        assert!(!tx("0x1", None).involves_any(&["0xabc".into()]));
    }

    #[test]
    fn tx_ref_from_transaction_keeps_sender() {
        let r = TxRef::from(&tx("alice.near", Some("bridge.near")));
        assert_eq!(r.sender.as_deref(), Some("alice.near"));
    }

    #[test]
    fn merged_logs_take_the_transaction_block() {
        let mut t = tx("alice.near", Some("bridge.near"));
        t.block_number = 10;
        t.block_hash = "hash10".into();
        t.transaction_index = "3".into();
        let receipt = ReceiptTransaction {
            transaction_hash: "0xabc".into(),
            block_number: 0,
            block_hash: "hashT".into(),
            from: "alice.near".into(),
            to: Some("bridge.near".into()),
            status: TxStatus::Success,
            logs: vec![Log {
                address: "bridge.near".into(),
                topics: vec!["publish".into()],
                data: "{}".into(),
                block_number: 0,
                block_hash: "hashR".into(),
                transaction_hash: "0xabc".into(),
                transaction_index: "0".into(),
                log_index: 0,
                removed: false,
                chain_id: 15,
            }],
            gas_used: None,
        };
        t.merge_receipt(&receipt);

        assert_eq!(t.status, Some(TxStatus::Success));
        assert_eq!(t.logs[0].block_number, 10);
        assert_eq!(t.logs[0].block_hash, "hash10");
        assert_eq!(t.logs[0].transaction_index, "3");
        assert_eq!(t.logs[0].topics, vec!["publish"]);
    }
}
