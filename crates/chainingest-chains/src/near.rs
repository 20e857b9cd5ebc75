//! Near-family repository.
//!
//! Blocks come from `block` (named params), their transactions from one
//! `chunk` call per chunk and receipts from `EXPERIMENTAL_tx_status`, which
//! needs the signer next to the hash. Near has no log query: logs are the
//! NEP-297 `EVENT_JSON:` lines emitted by receipt outcomes, with the event
//! name as the only topic and the executor account as the address.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use chainingest_core::request::JsonRpcRequest;
use chainingest_core::{
    Block, BlockMap, BlockTag, ChainBlockRepository, Log, LogFilter, ReceiptTransaction,
    RepositoryError, RpcTransport, Transaction, TransportError, TxRef, TxStatus, RECEIPT_BATCH_SIZE,
};

use crate::registry::ChainRegistry;
use crate::rpc;

/// Error cause Near reports for a height with no block.
pub const UNKNOWN_BLOCK_CAUSE: &str = "UNKNOWN_BLOCK";

const DEFAULT_BLOCK_BATCH_SIZE: u64 = 50;
const EVENT_PREFIX: &str = "EVENT_JSON:";
const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Deserialize)]
struct RawBlock {
    header: RawHeader,
    #[serde(default)]
    chunks: Vec<RawChunkRef>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    height: Option<u64>,
    hash: Option<String>,
    /// Nanoseconds since the epoch.
    timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawChunkRef {
    chunk_hash: String,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    transactions: Vec<RawNearTx>,
}

#[derive(Debug, Deserialize)]
struct RawNearTx {
    hash: String,
    signer_id: String,
    receiver_id: String,
}

#[derive(Debug, Deserialize)]
struct RawTxStatus {
    #[serde(default)]
    status: Value,
    transaction: RawNearTx,
    transaction_outcome: RawOutcomeWithId,
    #[serde(default)]
    receipts_outcome: Vec<RawOutcomeWithId>,
}

#[derive(Debug, Deserialize)]
struct RawOutcomeWithId {
    block_hash: String,
    outcome: RawOutcome,
}

#[derive(Debug, Deserialize)]
struct RawOutcome {
    #[serde(default)]
    logs: Vec<String>,
    executor_id: String,
    #[serde(default)]
    gas_burnt: u64,
}

/// Event name and JSON body of a NEP-297 `EVENT_JSON:` log line.
pub fn parse_event_log(line: &str) -> Option<(String, String)> {
    let body = line.strip_prefix(EVENT_PREFIX)?.trim();
    let value: Value = serde_json::from_str(body).ok()?;
    let event = value.get("event")?.as_str()?.to_string();
    Some((event, body.to_string()))
}

fn block_params(block: BlockTag) -> Value {
    match block {
        BlockTag::Number(n) => json!({ "block_id": n }),
        BlockTag::Latest => json!({ "finality": "optimistic" }),
        BlockTag::Safe => json!({ "finality": "near-final" }),
        BlockTag::Finalized => json!({ "finality": "final" }),
    }
}

/// Parse a `block` result into the block and its chunk hashes.
fn parse_block(value: Value) -> Result<(Block, Vec<String>), RepositoryError> {
    let raw: RawBlock = rpc::decode(value, "block")?;
    let number = raw
        .header
        .height
        .ok_or_else(|| RepositoryError::protocol("block header without height"))?;
    let hash = raw
        .header
        .hash
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RepositoryError::protocol(format!("block {number} without hash")))?;
    let timestamp = raw
        .header
        .timestamp
        .ok_or_else(|| RepositoryError::protocol(format!("block {number} without timestamp")))?;
    let block = Block {
        number,
        hash,
        timestamp: (timestamp / NANOS_PER_SEC) as i64,
        transactions: None,
    };
    Ok((block, raw.chunks.into_iter().map(|c| c.chunk_hash).collect()))
}

fn tx_status(status: &Value) -> TxStatus {
    if status.get("SuccessValue").is_some() || status.get("SuccessReceiptId").is_some() {
        TxStatus::Success
    } else if status.get("Failure").is_some() {
        TxStatus::Reverted
    } else {
        TxStatus::Unknown
    }
}

fn parse_receipt(value: Value, chain_id: u64) -> Result<ReceiptTransaction, RepositoryError> {
    let raw: RawTxStatus = rpc::decode(value, "EXPERIMENTAL_tx_status result")?;
    let hash = raw.transaction.hash.clone();

    let mut logs = Vec::new();
    let mut gas_used = 0u64;
    for outcome in std::iter::once(&raw.transaction_outcome).chain(raw.receipts_outcome.iter()) {
        gas_used = gas_used.saturating_add(outcome.outcome.gas_burnt);
        for line in &outcome.outcome.logs {
            let Some((event, data)) = parse_event_log(line) else {
                if line.starts_with(EVENT_PREFIX) {
                    tracing::warn!(tx = %hash, line, "undecodable NEP-297 event");
                }
                continue;
            };
            logs.push(Log {
                address: outcome.outcome.executor_id.clone(),
                topics: vec![event],
                data,
                block_number: 0,
                block_hash: outcome.block_hash.clone(),
                transaction_hash: hash.clone(),
                transaction_index: "0".into(),
                log_index: logs.len() as u64,
                removed: false,
                chain_id,
            });
        }
    }

    Ok(ReceiptTransaction {
        transaction_hash: hash,
        block_number: 0,
        block_hash: raw.transaction_outcome.block_hash.clone(),
        from: raw.transaction.signer_id,
        to: Some(raw.transaction.receiver_id),
        status: tx_status(&raw.status),
        logs,
        gas_used: Some(gas_used),
    })
}

/// Repository for Near networks.
pub struct NearBlockRepository {
    chains: ChainRegistry,
    block_batch_size: u64,
}

impl NearBlockRepository {
    pub fn new(chains: ChainRegistry) -> Self {
        Self {
            chains,
            block_batch_size: DEFAULT_BLOCK_BATCH_SIZE,
        }
    }

    /// Blocks per `get_blocks` batch when scanning a range for logs.
    pub fn with_block_batch_size(mut self, size: u64) -> Self {
        self.block_batch_size = size.max(1);
        self
    }

    /// Fill in `transactions` for every block from its chunks, in one batch.
    async fn attach_transactions(
        &self,
        transport: &dyn RpcTransport,
        blocks: &mut [(Block, Vec<String>)],
    ) -> Result<(), RepositoryError> {
        let mut reqs = Vec::new();
        for (block, chunks) in blocks.iter() {
            for chunk in chunks {
                let id = reqs.len() as u64;
                tracing::trace!(block = block.number, chunk = %chunk, id, "chunk request");
                reqs.push(JsonRpcRequest::with_params(id, "chunk", json!({ "chunk_id": chunk })));
            }
        }
        let mut responses = rpc::batch(transport, reqs).await?;

        let mut id = 0u64;
        for (block, chunks) in blocks.iter_mut() {
            let mut txs = Vec::new();
            for _ in chunks.iter() {
                let value = rpc::result(rpc::take(&mut responses, id, "chunk")?)?;
                id += 1;
                let chunk: RawChunk = rpc::decode(value, "chunk")?;
                for tx in chunk.transactions {
                    txs.push(Transaction {
                        hash: tx.hash,
                        block_number: block.number,
                        block_hash: block.hash.clone(),
                        from: tx.signer_id,
                        to: Some(tx.receiver_id),
                        input: String::new(),
                        value: String::new(),
                        transaction_index: txs.len().to_string(),
                        status: None,
                        timestamp: None,
                        logs: vec![],
                        chain: None,
                        chain_id: None,
                        environment: None,
                    });
                }
            }
            block.transactions = Some(txs);
        }
        Ok(())
    }
}

#[async_trait]
impl ChainBlockRepository for NearBlockRepository {
    async fn get_block_height(&self, chain: &str, finality: BlockTag) -> Result<u64, RepositoryError> {
        if let BlockTag::Number(n) = finality {
            return Err(RepositoryError::InvalidArgument(format!(
                "height needs a finality tag, got block {n}"
            )));
        }
        Ok(self.get_block(chain, finality, false).await?.number)
    }

    async fn get_blocks(
        &self,
        chain: &str,
        numbers: &BTreeSet<u64>,
        include_transactions: bool,
    ) -> Result<BlockMap, RepositoryError> {
        let settings = self.chains.get(chain)?;
        if numbers.is_empty() {
            return Ok(BlockMap::new());
        }
        let transport = settings.transport.as_ref();

        let reqs = numbers
            .iter()
            .map(|&n| JsonRpcRequest::with_params(n, "block", block_params(BlockTag::Number(n))))
            .collect();
        let mut responses = rpc::batch(transport, reqs).await?;

        let mut fetched = Vec::with_capacity(numbers.len());
        let mut degraded = Vec::new();
        for &n in numbers {
            let resp = rpc::take(&mut responses, n, "block")?;
            match resp.into_result() {
                Err(e) if e.cause_name() == Some(UNKNOWN_BLOCK_CAUSE) => {
                    tracing::warn!(chain, block = n, "unknown block, using placeholder");
                    degraded.push(Block::degraded(n));
                }
                Err(e) => return Err(TransportError::Rpc(e).into()),
                Ok(Value::Null) => {
                    tracing::warn!(chain, block = n, "null block, using placeholder");
                    degraded.push(Block::degraded(n));
                }
                Ok(value) => fetched.push(parse_block(value)?),
            }
        }

        if include_transactions {
            self.attach_transactions(transport, &mut fetched).await?;
        }

        let mut blocks = BlockMap::with_capacity(numbers.len());
        for block in fetched.into_iter().map(|(b, _)| b).chain(degraded) {
            blocks.insert(block.map_key(), block);
        }
        Ok(blocks)
    }

    async fn get_block(
        &self,
        chain: &str,
        block: BlockTag,
        include_transactions: bool,
    ) -> Result<Block, RepositoryError> {
        let settings = self.chains.get(chain)?;
        let transport = settings.transport.as_ref();
        let req = JsonRpcRequest::with_params(1, "block", block_params(block));
        let value = rpc::result(rpc::send(transport, req).await?)?;
        if value.is_null() {
            return Err(RepositoryError::protocol(format!("block {block} not found on {chain}")));
        }
        let mut parsed = [parse_block(value)?];
        if include_transactions {
            self.attach_transactions(transport, &mut parsed).await?;
        }
        let [(block, _)] = parsed;
        Ok(block)
    }

    async fn get_filtered_logs(&self, chain: &str, filter: &LogFilter) -> Result<Vec<Log>, RepositoryError> {
        let settings = self.chains.get(chain)?;
        if filter.is_empty_range() {
            return Ok(vec![]);
        }
        if filter.addresses.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "near log queries need at least one account".into(),
            ));
        }

        // hash -> (block number, block hash, index in block)
        let mut origin: HashMap<String, (u64, String, String)> = HashMap::new();
        let mut refs = BTreeSet::new();
        let mut start = filter.from_block;
        loop {
            let end = start.saturating_add(self.block_batch_size - 1).min(filter.to_block);
            let numbers: BTreeSet<u64> = (start..=end).collect();
            let blocks = self.get_blocks(chain, &numbers, true).await?;
            for tx in blocks.values().flat_map(|b| b.transactions.iter().flatten()) {
                if tx.to.as_deref().is_some_and(|to| filter.matches_address(to)) {
                    refs.insert(TxRef::from(tx));
                    origin.insert(
                        tx.hash.clone(),
                        (tx.block_number, tx.block_hash.clone(), tx.transaction_index.clone()),
                    );
                }
            }
            if end >= filter.to_block {
                break;
            }
            start = end + 1;
        }

        let receipts = self.get_transaction_receipts(chain, &refs).await?;
        let topics = filter.flat_topics();
        let mut logs = Vec::new();
        for (hash, receipt) in receipts {
            let Some((number, block_hash, index)) = origin.get(&hash) else { continue };
            for mut log in receipt.logs {
                if !filter.matches_address(&log.address) {
                    continue;
                }
                if !topics.is_empty() && !log.has_any_topic(&topics) {
                    continue;
                }
                log.block_number = *number;
                log.block_hash = block_hash.clone();
                log.transaction_index = index.clone();
                logs.push(log);
            }
        }
        logs.sort_by(|a, b| (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index)));
        tracing::debug!(chain, count = logs.len(), "derived logs");
        Ok(logs)
    }

    async fn get_transaction_receipts(
        &self,
        chain: &str,
        txs: &BTreeSet<TxRef>,
    ) -> Result<HashMap<String, ReceiptTransaction>, RepositoryError> {
        let settings = self.chains.get(chain)?;
        if let Some(tx) = txs.iter().find(|t| t.sender.is_none()) {
            return Err(RepositoryError::InvalidArgument(format!(
                "near receipt lookup for {} needs the sender account",
                tx.hash
            )));
        }

        let refs: Vec<&TxRef> = txs.iter().collect();
        let mut receipts = HashMap::with_capacity(refs.len());
        for chunk in refs.chunks(RECEIPT_BATCH_SIZE) {
            let reqs = chunk
                .iter()
                .enumerate()
                .map(|(i, tx)| {
                    JsonRpcRequest::new(
                        i as u64,
                        "EXPERIMENTAL_tx_status",
                        vec![json!(tx.hash), json!(tx.sender)],
                    )
                })
                .collect();
            let mut responses = rpc::batch(settings.transport.as_ref(), reqs).await?;

            for (i, tx) in chunk.iter().enumerate() {
                let value = rpc::result(rpc::take(&mut responses, i as u64, "EXPERIMENTAL_tx_status")?)?;
                if value.is_null() {
                    tracing::debug!(chain, tx = %tx.hash, "transaction status not found");
                    continue;
                }
                receipts.insert(tx.hash.clone(), parse_receipt(value, settings.chain_id)?);
            }
        }
        Ok(receipts)
    }
}
