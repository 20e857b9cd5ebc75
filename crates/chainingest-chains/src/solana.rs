//! Solana-family repository.
//!
//! Block numbers are slots. Solana has no log query, so
//! [`get_filtered_logs`](SolanaBlockRepository::get_filtered_logs) pages
//! through `getSignaturesForAddress` for each filter address and derives one
//! log per transaction from its `Program log: Instruction: <Name>` messages;
//! the instruction names are the log's topics. Failed transactions yield no
//! logs. A transaction's `to` is the program of its first instruction that
//! is not a compute-budget instruction.

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

/// `getBlock` errors that mean the slot has no block to serve.
pub const SKIPPED_SLOT_CODES: [i64; 3] = [-32004, -32007, -32009];

/// Fee-setting program that leads most transactions; never a transaction's target.
pub const COMPUTE_BUDGET_PROGRAM: &str = "ComputeBudget111111111111111111111111111111";

const DEFAULT_SIGNATURE_PAGE_LIMIT: usize = 1000;
const INSTRUCTION_PREFIX: &str = "Program log: Instruction: ";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    blockhash: Option<String>,
    block_time: Option<i64>,
    #[serde(default)]
    transactions: Vec<RawTxEntry>,
}

#[derive(Debug, Deserialize)]
struct RawTxEntry {
    meta: Option<RawMeta>,
    transaction: RawTxBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    fee: Option<u64>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

impl RawMeta {
    fn failed(meta: Option<&RawMeta>) -> bool {
        meta.is_some_and(|m| m.err.is_some())
    }

    fn status(meta: Option<&RawMeta>) -> TxStatus {
        match meta {
            None => TxStatus::Unknown,
            Some(m) if m.err.is_none() => TxStatus::Success,
            Some(_) => TxStatus::Reverted,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTxBody {
    signatures: Vec<String>,
    message: RawMessage,
}

impl RawTxBody {
    fn signature(&self) -> Result<&str, RepositoryError> {
        self.signatures
            .first()
            .map(String::as_str)
            .ok_or_else(|| RepositoryError::protocol("transaction without signature"))
    }

    fn fee_payer(&self) -> Result<&str, RepositoryError> {
        self.message
            .account_keys
            .first()
            .map(String::as_str)
            .ok_or_else(|| RepositoryError::protocol("transaction without account keys"))
    }

    fn program_of(&self, ix: &RawInstruction) -> Option<&str> {
        self.message.account_keys.get(ix.program_id_index).map(String::as_str)
    }

    /// First instruction that does not target the compute-budget program.
    fn main_instruction(&self) -> Option<&RawInstruction> {
        let instructions = &self.message.instructions;
        instructions
            .iter()
            .find(|ix| self.program_of(ix) != Some(COMPUTE_BUDGET_PROGRAM))
            .or_else(|| instructions.first())
    }

    /// Program invoked by the main instruction.
    fn program(&self) -> Option<&str> {
        self.program_of(self.main_instruction()?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    account_keys: Vec<String>,
    #[serde(default)]
    instructions: Vec<RawInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstruction {
    program_id_index: usize,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    slot: u64,
    meta: Option<RawMeta>,
    transaction: RawTxBody,
}

/// Instruction names announced in a transaction's log messages.
pub fn instruction_names(messages: &[String]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| m.strip_prefix(INSTRUCTION_PREFIX))
        .map(|name| name.trim().to_string())
        .collect()
}

fn commitment(tag: BlockTag) -> &'static str {
    match tag {
        BlockTag::Finalized => "finalized",
        BlockTag::Safe => "confirmed",
        BlockTag::Latest | BlockTag::Number(_) => "processed",
    }
}

fn block_request(slot: u64, include_transactions: bool) -> JsonRpcRequest {
    JsonRpcRequest::new(
        slot,
        "getBlock",
        vec![
            json!(slot),
            json!({
                "encoding": "json",
                "transactionDetails": if include_transactions { "full" } else { "none" },
                "rewards": false,
                "maxSupportedTransactionVersion": 0,
            }),
        ],
    )
}

fn parse_block(slot: u64, value: Value, include_transactions: bool) -> Result<Block, RepositoryError> {
    let raw: RawBlock = rpc::decode(value, "block")?;
    let hash = raw
        .blockhash
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RepositoryError::protocol(format!("slot {slot} without blockhash")))?;
    let timestamp = raw
        .block_time
        .ok_or_else(|| RepositoryError::protocol(format!("slot {slot} without blockTime")))?;

    let transactions = if include_transactions {
        let txs = raw
            .transactions
            .iter()
            .enumerate()
            .map(|(i, entry)| -> Result<Transaction, RepositoryError> {
                let body = &entry.transaction;
                Ok(Transaction {
                    hash: body.signature()?.to_string(),
                    block_number: slot,
                    block_hash: hash.clone(),
                    from: body.fee_payer()?.to_string(),
                    to: body.program().map(str::to_string),
                    input: body
                        .main_instruction()
                        .map(|ix| ix.data.clone())
                        .unwrap_or_default(),
                    value: String::new(),
                    transaction_index: i.to_string(),
                    status: Some(RawMeta::status(entry.meta.as_ref())),
                    timestamp: None,
                    logs: vec![],
                    chain: None,
                    chain_id: None,
                    environment: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Some(txs)
    } else {
        None
    };

    Ok(Block {
        number: slot,
        hash,
        timestamp,
        transactions,
    })
}

fn derived_log(tx: &RawTransaction, address: &str, chain_id: u64) -> Result<Log, RepositoryError> {
    let messages = tx
        .meta
        .as_ref()
        .and_then(|m| m.log_messages.as_deref())
        .unwrap_or_default();
    Ok(Log {
        address: address.to_string(),
        topics: instruction_names(messages),
        data: String::new(),
        block_number: tx.slot,
        block_hash: String::new(),
        transaction_hash: tx.transaction.signature()?.to_string(),
        transaction_index: "0".into(),
        log_index: 0,
        removed: false,
        chain_id,
    })
}

/// Repository for Solana clusters.
pub struct SolanaBlockRepository {
    chains: ChainRegistry,
    signature_page_limit: usize,
}

impl SolanaBlockRepository {
    pub fn new(chains: ChainRegistry) -> Self {
        Self {
            chains,
            signature_page_limit: DEFAULT_SIGNATURE_PAGE_LIMIT,
        }
    }

    /// Page size for `getSignaturesForAddress`.
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.signature_page_limit = limit.max(1);
        self
    }

    /// Signatures of successful transactions touching `address` whose slot
    /// lies in the filter range, newest first.
    async fn signatures_in_range(
        &self,
        transport: &dyn RpcTransport,
        address: &str,
        filter: &LogFilter,
    ) -> Result<Vec<RawSignature>, RepositoryError> {
        let mut before: Option<String> = None;
        let mut found = Vec::new();
        let mut page_no = 0u64;
        loop {
            page_no += 1;
            let mut opts = json!({ "limit": self.signature_page_limit, "commitment": "finalized" });
            if let Some(sig) = &before {
                opts["before"] = json!(sig);
            }
            let req = JsonRpcRequest::new(page_no, "getSignaturesForAddress", vec![json!(address), opts]);
            let value = rpc::result(rpc::send(transport, req).await?)?;
            let page: Vec<RawSignature> = rpc::decode(value, "signature page")?;

            let full_page = page.len() >= self.signature_page_limit;
            before = page.last().map(|s| s.signature.clone());
            let mut passed_start = false;
            for sig in page {
                if sig.slot < filter.from_block {
                    passed_start = true;
                    break;
                }
                if sig.slot > filter.to_block {
                    continue;
                }
                if sig.err.is_some() {
                    tracing::trace!(signature = %sig.signature, "skipping failed transaction");
                    continue;
                }
                found.push(sig);
            }
            if passed_start || !full_page {
                break;
            }
        }
        tracing::debug!(address, pages = page_no, found = found.len(), "paged signatures");
        Ok(found)
    }

    /// `getTransaction` for every signature, batched; missing ones are skipped.
    async fn fetch_transactions(
        &self,
        transport: &dyn RpcTransport,
        signatures: &[&str],
    ) -> Result<HashMap<String, RawTransaction>, RepositoryError> {
        let mut out = HashMap::with_capacity(signatures.len());
        for chunk in signatures.chunks(RECEIPT_BATCH_SIZE) {
            let reqs = chunk
                .iter()
                .enumerate()
                .map(|(i, sig)| {
                    JsonRpcRequest::new(
                        i as u64,
                        "getTransaction",
                        vec![json!(sig), json!({ "encoding": "json", "maxSupportedTransactionVersion": 0 })],
                    )
                })
                .collect();
            let mut responses = rpc::batch(transport, reqs).await?;
            for (i, sig) in chunk.iter().enumerate() {
                let value = rpc::result(rpc::take(&mut responses, i as u64, "getTransaction")?)?;
                if value.is_null() {
                    tracing::debug!(signature = %sig, "transaction not found");
                    continue;
                }
                out.insert(sig.to_string(), rpc::decode(value, "transaction")?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ChainBlockRepository for SolanaBlockRepository {
    async fn get_block_height(&self, chain: &str, finality: BlockTag) -> Result<u64, RepositoryError> {
        let settings = self.chains.get(chain)?;
        if let BlockTag::Number(n) = finality {
            return Err(RepositoryError::InvalidArgument(format!(
                "height needs a commitment tag, got slot {n}"
            )));
        }
        let req = JsonRpcRequest::new(1, "getSlot", vec![json!({ "commitment": commitment(finality) })]);
        let value = rpc::result(rpc::send(settings.transport.as_ref(), req).await?)?;
        value
            .as_u64()
            .ok_or_else(|| RepositoryError::protocol(format!("getSlot returned {value}")))
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
            .map(|&slot| block_request(slot, include_transactions))
            .collect();
        let mut responses = rpc::batch(settings.transport.as_ref(), reqs).await?;

        let mut blocks = BlockMap::with_capacity(numbers.len());
        for &slot in numbers {
            let resp = rpc::take(&mut responses, slot, "getBlock")?;
            let block = match resp.into_result() {
                Err(e) if SKIPPED_SLOT_CODES.contains(&e.code) => {
                    tracing::warn!(chain, slot, code = e.code, "slot unavailable, using placeholder");
                    Block::degraded(slot)
                }
                Err(e) => return Err(TransportError::Rpc(e).into()),
                Ok(Value::Null) => {
                    tracing::warn!(chain, slot, "null block, using placeholder");
                    Block::degraded(slot)
                }
                Ok(value) => parse_block(slot, value, include_transactions)?,
            };
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
        let slot = match block {
            BlockTag::Number(slot) => slot,
            tag => self.get_block_height(chain, tag).await?,
        };
        let settings = self.chains.get(chain)?;
        let value = rpc::result(
            rpc::send(settings.transport.as_ref(), block_request(slot, include_transactions)).await?,
        )?;
        if value.is_null() {
            return Err(RepositoryError::protocol(format!("slot {slot} not found on {chain}")));
        }
        parse_block(slot, value, include_transactions)
    }

    async fn get_filtered_logs(&self, chain: &str, filter: &LogFilter) -> Result<Vec<Log>, RepositoryError> {
        let settings = self.chains.get(chain)?;
        if filter.is_empty_range() {
            return Ok(vec![]);
        }
        if filter.addresses.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "solana log queries need at least one address".into(),
            ));
        }

        let transport = settings.transport.as_ref();
        let topics = filter.flat_topics();
        let mut logs = Vec::new();
        for address in &filter.addresses {
            let signatures = self.signatures_in_range(transport, address, filter).await?;
            let sigs: Vec<&str> = signatures.iter().map(|s| s.signature.as_str()).collect();
            let txs = self.fetch_transactions(transport, &sigs).await?;

            for sig in &sigs {
                let Some(tx) = txs.get(*sig) else { continue };
                if RawMeta::failed(tx.meta.as_ref()) {
                    continue;
                }
                let log = derived_log(tx, address, settings.chain_id)?;
                if topics.is_empty() || log.has_any_topic(&topics) {
                    logs.push(log);
                }
            }
        }
        tracing::debug!(chain, count = logs.len(), "derived logs");
        Ok(logs)
    }

    async fn get_transaction_receipts(
        &self,
        chain: &str,
        txs: &BTreeSet<TxRef>,
    ) -> Result<HashMap<String, ReceiptTransaction>, RepositoryError> {
        let settings = self.chains.get(chain)?;
        let sigs: Vec<&str> = txs.iter().map(|t| t.hash.as_str()).collect();
        let fetched = self.fetch_transactions(settings.transport.as_ref(), &sigs).await?;

        let mut receipts = HashMap::with_capacity(fetched.len());
        for (sig, tx) in fetched {
            let program = tx.transaction.program().map(str::to_string);
            let log = derived_log(&tx, program.as_deref().unwrap_or_default(), settings.chain_id)?;
            let receipt = ReceiptTransaction {
                transaction_hash: sig.clone(),
                block_number: tx.slot,
                block_hash: String::new(),
                from: tx.transaction.fee_payer()?.to_string(),
                to: program,
                status: RawMeta::status(tx.meta.as_ref()),
                logs: vec![log],
                gas_used: tx.meta.as_ref().and_then(|m| m.fee),
            };
            receipts.insert(sig, receipt);
        }
        Ok(receipts)
    }
}
