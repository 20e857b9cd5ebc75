//! EVM-family repository.
//!
//! Uses `eth_getBlockByNumber` (batched, request id = block number),
//! `eth_getLogs` and `eth_getTransactionReceipt` (batched, at most
//! [`RECEIPT_BATCH_SIZE`] per round trip).

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use chainingest_core::request::{to_hex, JsonRpcRequest};
use chainingest_core::{
    Block, BlockMap, BlockTag, ChainBlockRepository, Log, LogFilter, ReceiptTransaction,
    RepositoryError, Transaction, TransportError, TxRef, TxStatus, RECEIPT_BATCH_SIZE,
};

use crate::registry::ChainRegistry;
use crate::rpc;

/// Provider-specific error code meaning "this block is not available here".
pub const BLOCK_UNAVAILABLE_CODE: i64 = 6969;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    number: Option<String>,
    hash: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    #[serde(default)]
    input: String,
    #[serde(default)]
    value: String,
    transaction_index: Option<String>,
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    pub transaction_hash: String,
    pub transaction_index: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Integer block number, decimal transaction index, chain id attached.
    pub fn normalize(self, chain_id: u64) -> Result<Log, RepositoryError> {
        Ok(Log {
            block_number: rpc::hex(&self.block_number, "log.blockNumber")?,
            transaction_index: rpc::hex(&self.transaction_index, "log.transactionIndex")?.to_string(),
            log_index: rpc::hex(&self.log_index, "log.logIndex")?,
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_hash: self.block_hash.unwrap_or_default(),
            transaction_hash: self.transaction_hash,
            removed: self.removed,
            chain_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: String,
    block_hash: String,
    from: String,
    to: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
    gas_used: Option<String>,
}

fn parse_block(value: Value, include_transactions: bool) -> Result<Block, RepositoryError> {
    let raw: RawBlock = rpc::decode(value, "block")?;
    let number = raw
        .number
        .ok_or_else(|| RepositoryError::protocol("block without number"))?;
    let number = rpc::hex(&number, "block.number")?;
    let hash = raw
        .hash
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RepositoryError::protocol(format!("block {number} without hash")))?;
    let timestamp = raw
        .timestamp
        .ok_or_else(|| RepositoryError::protocol(format!("block {number} without timestamp")))?;
    let timestamp = rpc::hex(&timestamp, "block.timestamp")? as i64;

    let transactions = if include_transactions {
        let txs = raw
            .transactions
            .into_iter()
            .map(|v| parse_transaction(v, number, &hash))
            .collect::<Result<Vec<_>, _>>()?;
        Some(txs)
    } else {
        None
    };

    Ok(Block {
        number,
        hash,
        timestamp,
        transactions,
    })
}

fn parse_transaction(value: Value, block_number: u64, block_hash: &str) -> Result<Transaction, RepositoryError> {
    let raw: RawTransaction = rpc::decode(value, "transaction")?;
    let transaction_index = match raw.transaction_index {
        Some(idx) => rpc::hex(&idx, "transaction.transactionIndex")?.to_string(),
        None => String::new(),
    };
    Ok(Transaction {
        hash: raw.hash,
        block_number,
        block_hash: block_hash.to_string(),
        from: raw.from,
        to: raw.to,
        input: raw.input,
        value: raw.value,
        transaction_index,
        status: None,
        timestamp: None,
        logs: vec![],
        chain: None,
        chain_id: None,
        environment: None,
    })
}

fn parse_receipt(value: Value, chain_id: u64) -> Result<ReceiptTransaction, RepositoryError> {
    let raw: RawReceipt = rpc::decode(value, "receipt")?;
    let status = match raw.status.as_deref() {
        Some("0x1") => TxStatus::Success,
        Some("0x0") => TxStatus::Reverted,
        _ => TxStatus::Unknown,
    };
    let gas_used = raw
        .gas_used
        .as_deref()
        .map(|g| rpc::hex(g, "receipt.gasUsed"))
        .transpose()?;
    let logs = raw
        .logs
        .into_iter()
        .map(|l| l.normalize(chain_id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ReceiptTransaction {
        transaction_hash: raw.transaction_hash,
        block_number: rpc::hex(&raw.block_number, "receipt.blockNumber")?,
        block_hash: raw.block_hash,
        from: raw.from,
        to: raw.to,
        status,
        logs,
        gas_used,
    })
}

/// Repository for EVM-compatible chains.
pub struct EvmBlockRepository {
    chains: ChainRegistry,
}

impl EvmBlockRepository {
    pub fn new(chains: ChainRegistry) -> Self {
        Self { chains }
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }
}

#[async_trait]
impl ChainBlockRepository for EvmBlockRepository {
    async fn get_block_height(&self, chain: &str, finality: BlockTag) -> Result<u64, RepositoryError> {
        if let BlockTag::Number(n) = finality {
            return Err(RepositoryError::InvalidArgument(format!(
                "height needs a finality tag, got block {n}"
            )));
        }
        let block = self.get_block(chain, finality, false).await?;
        Ok(block.number)
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

        let reqs = numbers
            .iter()
            .map(|&n| {
                JsonRpcRequest::new(
                    n,
                    "eth_getBlockByNumber",
                    vec![json!(to_hex(n)), json!(include_transactions)],
                )
            })
            .collect();
        let mut responses = rpc::batch(settings.transport.as_ref(), reqs).await?;

        let mut blocks = BlockMap::with_capacity(numbers.len());
        for &n in numbers {
            let resp = rpc::take(&mut responses, n, "eth_getBlockByNumber")?;
            let block = match resp.into_result() {
                Err(e) if e.code == BLOCK_UNAVAILABLE_CODE => {
                    tracing::warn!(chain, block = n, error = %e, "block unavailable, using placeholder");
                    Block::degraded(n)
                }
                Err(e) => return Err(TransportError::Rpc(e).into()),
                Ok(Value::Null) => {
                    tracing::warn!(chain, block = n, "null block, using placeholder");
                    Block::degraded(n)
                }
                Ok(value) => parse_block(value, include_transactions)?,
            };
            blocks.insert(block.map_key(), block);
        }
        tracing::debug!(chain, requested = numbers.len(), "fetched blocks");
        Ok(blocks)
    }

    async fn get_block(
        &self,
        chain: &str,
        block: BlockTag,
        include_transactions: bool,
    ) -> Result<Block, RepositoryError> {
        let settings = self.chains.get(chain)?;
        let req = JsonRpcRequest::new(
            1,
            "eth_getBlockByNumber",
            vec![block.to_evm_param(), json!(include_transactions)],
        );
        let value = rpc::result(rpc::send(settings.transport.as_ref(), req).await?)?;
        if value.is_null() {
            return Err(RepositoryError::protocol(format!("block {block} not found on {chain}")));
        }
        parse_block(value, include_transactions)
    }

    async fn get_filtered_logs(&self, chain: &str, filter: &LogFilter) -> Result<Vec<Log>, RepositoryError> {
        let settings = self.chains.get(chain)?;
        if filter.is_empty_range() {
            return Ok(vec![]);
        }

        let mut params = json!({
            "fromBlock": to_hex(filter.from_block),
            "toBlock": to_hex(filter.to_block),
        });
        if !filter.addresses.is_empty() {
            params["address"] = json!(filter.addresses);
        }
        if !filter.topics.is_empty() {
            params["topics"] = json!(filter.topics);
        }

        let req = JsonRpcRequest::new(1, "eth_getLogs", vec![params]);
        let value = rpc::result(rpc::send(settings.transport.as_ref(), req).await?)?;
        let raw: Vec<RawLog> = rpc::decode(value, "eth_getLogs result")?;
        let logs = raw
            .into_iter()
            .map(|l| l.normalize(settings.chain_id))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            chain,
            from = filter.from_block,
            to = filter.to_block,
            count = logs.len(),
            "fetched logs"
        );
        Ok(logs)
    }

    async fn get_transaction_receipts(
        &self,
        chain: &str,
        txs: &BTreeSet<TxRef>,
    ) -> Result<HashMap<String, ReceiptTransaction>, RepositoryError> {
        let settings = self.chains.get(chain)?;
        let refs: Vec<&TxRef> = txs.iter().collect();
        let mut receipts = HashMap::with_capacity(refs.len());

        for chunk in refs.chunks(RECEIPT_BATCH_SIZE) {
            let reqs = chunk
                .iter()
                .enumerate()
                .map(|(i, tx)| JsonRpcRequest::new(i as u64, "eth_getTransactionReceipt", vec![json!(tx.hash)]))
                .collect();
            let mut responses = rpc::batch(settings.transport.as_ref(), reqs).await?;

            for (i, tx) in chunk.iter().enumerate() {
                let value = rpc::result(rpc::take(&mut responses, i as u64, "eth_getTransactionReceipt")?)?;
                if value.is_null() {
                    tracing::debug!(chain, tx = %tx.hash, "receipt not found");
                    continue;
                }
                receipts.insert(tx.hash.clone(), parse_receipt(value, settings.chain_id)?);
            }
        }
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id_of, rpc_error, MockTransport};
    use chainingest_core::request::{parse_hex_u64, JsonRpcResponse};
    use std::sync::Arc;

    fn block_json(n: u64) -> Value {
        json!({
            "number": to_hex(n),
            "hash": format!("0xhash{n}"),
            "timestamp": "0x65000000",
            "transactions": [{
                "hash": format!("0xtx{n}"),
                "from": "0xSender",
                "to": "0xBridge",
                "input": "0x",
                "value": "0x0",
                "transactionIndex": "0x3"
            }]
        })
    }

    fn receipt_json(hash: &str) -> Value {
        json!({
            "transactionHash": hash,
            "blockNumber": "0xa",
            "blockHash": "0xhash10",
            "from": "0xSender",
            "to": "0xBridge",
            "status": "0x1",
            "gasUsed": "0x5208",
            "logs": [{
                "address": "0xBridge",
                "topics": ["0xtopic"],
                "data": "0x",
                "blockNumber": "0xa",
                "blockHash": "0xhash10",
                "transactionHash": hash,
                "transactionIndex": "0x0",
                "logIndex": "0x1"
            }]
        })
    }

    fn node(req: &JsonRpcRequest) -> JsonRpcResponse {
        let id = id_of(req);
        match req.method.as_str() {
            "eth_getBlockByNumber" => {
                let n = req.params[0].as_str().and_then(parse_hex_u64).unwrap_or(0);
                JsonRpcResponse::ok(id, block_json(n))
            }
            "eth_getTransactionReceipt" => {
                let hash = req.params[0].as_str().unwrap_or_default();
                JsonRpcResponse::ok(id, receipt_json(hash))
            }
            other => panic!("unexpected method {other}"),
        }
    }

    fn repo(mock: Arc<MockTransport>) -> EvmBlockRepository {
        EvmBlockRepository::new(ChainRegistry::new().with_chain("ethereum", 2, mock))
    }

    #[tokio::test]
    async fn empty_block_set_makes_no_calls() {
        let mock = Arc::new(MockTransport::new(node));
        let blocks = repo(mock.clone())
            .get_blocks("ethereum", &BTreeSet::new(), false)
            .await
            .unwrap();
        assert!(blocks.is_empty());
        assert_eq!(mock.network_calls(), 0);
    }

    #[tokio::test]
    async fn blocks_are_correlated_by_id_not_position() {
        let mock = Arc::new(MockTransport::new(node).reversed());
        let blocks = repo(mock.clone())
            .get_blocks("ethereum", &BTreeSet::from([10, 20, 30]), false)
            .await
            .unwrap();

        assert_eq!(mock.network_calls(), 1);
        assert_eq!(blocks.len(), 3);
        for n in [10u64, 20, 30] {
            let b = &blocks[&format!("0xhash{n}")];
            assert_eq!(b.number, n);
            assert_eq!(b.timestamp, 0x65000000);
            assert!(b.transactions.is_none());
        }
    }

    #[tokio::test]
    async fn unavailable_and_null_blocks_degrade() {
        let mock = Arc::new(MockTransport::new(|req| {
            let id = id_of(req);
            match id {
                1 => JsonRpcResponse::err(id, rpc_error(BLOCK_UNAVAILABLE_CODE, "block unavailable")),
                2 => JsonRpcResponse::ok(id, Value::Null),
                _ => JsonRpcResponse::ok(id, block_json(id)),
            }
        }));
        let blocks = repo(mock)
            .get_blocks("ethereum", &BTreeSet::from([1, 2, 3]), false)
            .await
            .unwrap();

        assert_eq!(blocks.len(), 3);
        assert!(blocks["0x1"].is_degraded());
        assert!(blocks["0x2"].is_degraded());
        assert_eq!(blocks["0x2"].number, 2);
        assert!(!blocks["0xhash3"].is_degraded());
    }

    #[tokio::test]
    async fn other_errors_abort_the_whole_call() {
        let mock = Arc::new(MockTransport::new(|req| {
            let id = id_of(req);
            if id == 2 {
                JsonRpcResponse::ok(id, json!("not a block"))
            } else {
                JsonRpcResponse::ok(id, block_json(id))
            }
        }));
        let err = repo(mock)
            .get_blocks("ethereum", &BTreeSet::from([1, 2]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Protocol(_)));

        let mock = Arc::new(MockTransport::new(|req| {
            JsonRpcResponse::err(id_of(req), rpc_error(-32000, "header not found"))
        }));
        let err = repo(mock)
            .get_blocks("ethereum", &BTreeSet::from([1]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Transport(TransportError::Rpc(_))));
    }

    #[tokio::test]
    async fn block_transactions_are_parsed_when_requested() {
        let mock = Arc::new(MockTransport::new(node));
        let block = repo(mock.clone())
            .get_block("ethereum", BlockTag::Number(7), true)
            .await
            .unwrap();

        let txs = block.transactions.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash, "0xtx7");
        assert_eq!(txs[0].block_number, 7);
        assert_eq!(txs[0].block_hash, "0xhash7");
        assert_eq!(txs[0].transaction_index, "3");
        assert_eq!(mock.requests()[0].params, json!(["0x7", true]));
    }

    #[tokio::test]
    async fn get_block_requires_hash() {
        let mock = Arc::new(MockTransport::new(|req| {
            JsonRpcResponse::ok(id_of(req), json!({ "number": "0x1", "timestamp": "0x1" }))
        }));
        let err = repo(mock).get_block("ethereum", BlockTag::Latest, false).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Protocol(_)));
    }

    #[tokio::test]
    async fn height_reads_the_tagged_block() {
        let mock = Arc::new(MockTransport::new(|req| {
            assert_eq!(req.params[0], json!("finalized"));
            JsonRpcResponse::ok(id_of(req), block_json(0x1234))
        }));
        let height = repo(mock)
            .get_block_height("ethereum", BlockTag::Finalized)
            .await
            .unwrap();
        assert_eq!(height, 0x1234);
    }

    #[tokio::test]
    async fn log_bounds_are_hex_and_fields_normalized() {
        let mock = Arc::new(MockTransport::new(|req| {
            JsonRpcResponse::ok(
                id_of(req),
                json!([{
                    "address": "0xBridge",
                    "topics": ["0xtopic"],
                    "data": "0xdead",
                    "blockNumber": "0x96",
                    "blockHash": "0xhash150",
                    "transactionHash": "0xtx",
                    "transactionIndex": "0x1f",
                    "logIndex": "0x2"
                }]),
            )
        }));
        let filter = LogFilter::new(100, 200)
            .address("0xBridge")
            .topic(vec!["0xtopic".into()]);
        let logs = repo(mock.clone()).get_filtered_logs("ethereum", &filter).await.unwrap();

        let params = &mock.requests()[0].params[0];
        assert_eq!(params["fromBlock"], "0x64");
        assert_eq!(params["toBlock"], "0xc8");
        assert_eq!(params["address"], json!(["0xBridge"]));
        assert_eq!(params["topics"], json!(["0xtopic"]));

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 150);
        assert_eq!(logs[0].transaction_index, "31");
        assert_eq!(logs[0].log_index, 2);
        assert_eq!(logs[0].chain_id, 2);
        assert!(!logs[0].removed);
    }

    #[tokio::test]
    async fn empty_log_range_makes_no_calls() {
        let mock = Arc::new(MockTransport::new(node));
        let logs = repo(mock.clone())
            .get_filtered_logs("ethereum", &LogFilter::new(10, 5))
            .await
            .unwrap();
        assert!(logs.is_empty());
        assert_eq!(mock.network_calls(), 0);
    }

    #[tokio::test]
    async fn receipts_are_fetched_in_batches_of_ten() {
        let mock = Arc::new(MockTransport::new(node).reversed());
        let txs: BTreeSet<TxRef> = (0..25).map(|i| TxRef::new(format!("0x{i:02}"))).collect();
        let receipts = repo(mock.clone())
            .get_transaction_receipts("ethereum", &txs)
            .await
            .unwrap();

        assert_eq!(mock.batch_sizes(), vec![10, 10, 5]);
        assert_eq!(receipts.len(), 25);
        let r = &receipts["0x07"];
        assert_eq!(r.transaction_hash, "0x07");
        assert_eq!(r.status, TxStatus::Success);
        assert_eq!(r.gas_used, Some(21_000));
        assert_eq!(r.logs[0].chain_id, 2);
    }

    #[tokio::test]
    async fn one_bad_receipt_fails_the_call() {
        let mock = Arc::new(MockTransport::new(|req| {
            let hash = req.params[0].as_str().unwrap_or_default().to_string();
            let body = if hash == "0x03" {
                json!({ "transactionHash": hash })
            } else {
                receipt_json(&hash)
            };
            JsonRpcResponse::ok(id_of(req), body)
        }));
        let txs: BTreeSet<TxRef> = (0..5).map(|i| TxRef::new(format!("0x{i:02}"))).collect();
        let err = repo(mock)
            .get_transaction_receipts("ethereum", &txs)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Protocol(_)));
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() {
        let mock = Arc::new(MockTransport::new(node));
        let err = repo(mock)
            .get_block_height("polygon", BlockTag::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UnknownChain(c) if c == "polygon"));
    }

    #[tokio::test]
    async fn retryable_failures_fail_over_to_the_other_provider() {
        use crate::testing::DownTransport;
        use chainingest_core::{
            ProviderPool, ProviderPoolConfig, RateLimitedRepository, ResilienceConfig, RpcTransport,
        };
        use std::time::Duration;

        let down = Arc::new(DownTransport::default());
        let up = Arc::new(MockTransport::new(|req| JsonRpcResponse::ok(id_of(req), block_json(99))));
        let pool = ProviderPool::new(
            "ethereum",
            vec![down.clone() as Arc<dyn RpcTransport>, up.clone() as Arc<dyn RpcTransport>],
            ProviderPoolConfig::default(),
        );
        let repo = RateLimitedRepository::new(
            EvmBlockRepository::new(ChainRegistry::new().with_chain("ethereum", 2, Arc::new(pool))),
            ResilienceConfig {
                interval: Duration::from_millis(1),
                attempts: 2,
                ..ResilienceConfig::default()
            },
        );

        // first try hits the dead provider, the retry lands on the live one
        assert_eq!(repo.get_block_height("ethereum", BlockTag::Latest).await.unwrap(), 99);
        assert_eq!((down.attempts(), up.network_calls()), (1, 1));

        // the dead provider stays offline for its cooldown
        assert_eq!(repo.get_block_height("ethereum", BlockTag::Latest).await.unwrap(), 99);
        assert_eq!((down.attempts(), up.network_calls()), (1, 2));
    }
}
