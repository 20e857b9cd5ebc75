//! In-memory chain for use-case tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use chainingest_core::{
    Block, BlockMap, BlockTag, ChainBlockRepository, Log, LogFilter, ReceiptTransaction,
    RepositoryError, Transaction, TxRef, TxStatus,
};

#[derive(Default)]
pub(crate) struct FakeChain {
    pub blocks: HashMap<u64, Block>,
    pub logs: Vec<Log>,
    pub receipts: HashMap<String, ReceiptTransaction>,
    pub head: AtomicU64,
    pub calls_made: AtomicUsize,
    pub log_queries: Mutex<Vec<LogFilter>>,
    pub block_requests: Mutex<Vec<BTreeSet<u64>>>,
}

impl FakeChain {
    pub(crate) fn calls(&self) -> usize {
        self.calls_made.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls_made.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainBlockRepository for FakeChain {
    async fn get_block_height(&self, _chain: &str, _finality: BlockTag) -> Result<u64, RepositoryError> {
        self.hit();
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_blocks(
        &self,
        _chain: &str,
        numbers: &BTreeSet<u64>,
        _include_transactions: bool,
    ) -> Result<BlockMap, RepositoryError> {
        self.hit();
        self.block_requests.lock().unwrap().push(numbers.clone());
        Ok(numbers
            .iter()
            .map(|n| self.blocks.get(n).cloned().unwrap_or_else(|| Block::degraded(*n)))
            .map(|b| (b.map_key(), b))
            .collect())
    }

    async fn get_block(&self, _chain: &str, block: BlockTag, _txs: bool) -> Result<Block, RepositoryError> {
        self.hit();
        match block {
            BlockTag::Number(n) => self
                .blocks
                .get(&n)
                .cloned()
                .ok_or_else(|| RepositoryError::protocol("no such block")),
            _ => Err(RepositoryError::InvalidArgument("tag".into())),
        }
    }

    async fn get_filtered_logs(&self, _chain: &str, filter: &LogFilter) -> Result<Vec<Log>, RepositoryError> {
        self.hit();
        self.log_queries.lock().unwrap().push(filter.clone());
        Ok(self.logs.clone())
    }

    async fn get_transaction_receipts(
        &self,
        _chain: &str,
        txs: &BTreeSet<TxRef>,
    ) -> Result<HashMap<String, ReceiptTransaction>, RepositoryError> {
        self.hit();
        Ok(txs
            .iter()
            .filter_map(|t| self.receipts.get(&t.hash).map(|r| (t.hash.clone(), r.clone())))
            .collect())
    }
}

pub(crate) fn block(number: u64, txs: Vec<Transaction>) -> Block {
    Block {
        number,
        hash: format!("0xblock{number}"),
        timestamp: 1_700_000_000 + number as i64,
        transactions: Some(txs),
    }
}

pub(crate) fn tx(hash: &str, block_number: u64, from: &str, to: &str) -> Transaction {
    Transaction {
        hash: hash.into(),
        block_number,
        block_hash: format!("0xblock{block_number}"),
        from: from.into(),
        to: Some(to.into()),
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

pub(crate) fn log(tx_hash: &str, block_number: u64, topics: &[&str]) -> Log {
    Log {
        address: "0xbridge".into(),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        data: "0x".into(),
        block_number,
        block_hash: format!("0xblock{block_number}"),
        transaction_hash: tx_hash.into(),
        transaction_index: "0".into(),
        log_index: 0,
        removed: false,
        chain_id: 2,
    }
}

pub(crate) fn receipt(hash: &str, topics: &[&str]) -> ReceiptTransaction {
    ReceiptTransaction {
        transaction_hash: hash.into(),
        block_number: 0,
        block_hash: String::new(),
        from: String::new(),
        to: None,
        status: TxStatus::Success,
        logs: vec![log(hash, 0, topics)],
        gas_used: Some(21_000),
    }
}
