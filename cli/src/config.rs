//! YAML configuration for the `run` command.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use chainingest_core::policy::{CircuitBreakerConfig, RetryConfig};
use chainingest_core::{BlockTag, ProviderPoolConfig, ResilienceConfig};
use chainingest_http::HttpClientConfig;
use chainingest_poller::PollerConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    /// Stamped on emitted transactions.
    #[serde(default)]
    pub environment: Option<String>,
    pub chains: BTreeMap<String, ChainConfig>,
    #[serde(default)]
    pub pollers: Vec<PollerEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Evm,
    Solana,
    Near,
}

impl std::str::FromStr for Family {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evm" => Ok(Self::Evm),
            "solana" => Ok(Self::Solana),
            "near" => Ok(Self::Near),
            other => bail!("unknown chain family '{other}' (expected evm, solana or near)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub family: Family,
    pub chain_id: u64,
    pub rpcs: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// HTTP-level retries per request.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_offline_cooldown_ms")]
    pub offline_cooldown_ms: u64,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    2
}

fn default_offline_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub period_ms: u64,
    pub limit: u32,
    pub interval_ms: u64,
    pub attempts: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            period_ms: 10_000,
            limit: 1000,
            interval_ms: 1000,
            attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            success_threshold: 1,
        }
    }
}

impl ChainConfig {
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            retry: RetryConfig {
                max_retries: self.retries,
                ..RetryConfig::default()
            },
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn pool_config(&self) -> ProviderPoolConfig {
        ProviderPoolConfig {
            offline_cooldown: Duration::from_millis(self.offline_cooldown_ms),
        }
    }

    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            period: Duration::from_millis(self.rate_limit.period_ms),
            limit: self.rate_limit.limit,
            interval: Duration::from_millis(self.rate_limit.interval_ms),
            attempts: self.rate_limit.attempts,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                open_duration: Duration::from_millis(self.circuit_breaker.open_duration_ms),
                success_threshold: self.circuit_breaker.success_threshold,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerKind {
    Logs,
    Transactions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finality {
    Latest,
    Safe,
    #[default]
    Finalized,
}

impl From<Finality> for BlockTag {
    fn from(f: Finality) -> Self {
        match f {
            Finality::Latest => BlockTag::Latest,
            Finality::Safe => BlockTag::Safe,
            Finality::Finalized => BlockTag::Finalized,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerEntry {
    pub id: String,
    pub chain: String,
    pub kind: PollerKind,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub to_block: Option<u64>,
    #[serde(default = "default_block_batch_size")]
    pub block_batch_size: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub finality: Finality,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

fn default_block_batch_size() -> u64 {
    100
}

fn default_interval_ms() -> u64 {
    5000
}

impl PollerEntry {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            id: self.id.clone(),
            chain: self.chain.clone(),
            finality: self.finality.into(),
            from_block: self.from_block,
            to_block: self.to_block,
            block_batch_size: self.block_batch_size,
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(raw).context("invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            bail!("no chains configured");
        }
        for (name, chain) in &self.chains {
            if chain.rpcs.is_empty() {
                bail!("chain '{name}' has no rpcs");
            }
        }

        let mut ids = HashSet::new();
        for poller in &self.pollers {
            if !ids.insert(poller.id.as_str()) {
                bail!("duplicate poller id '{}'", poller.id);
            }
            if !self.chains.contains_key(&poller.chain) {
                bail!("poller '{}' refers to unknown chain '{}'", poller.id, poller.chain);
            }
            if poller.block_batch_size == 0 {
                bail!("poller '{}': block_batch_size must be positive", poller.id);
            }
            if let (Some(from), Some(to)) = (poller.from_block, poller.to_block) {
                if from > to {
                    bail!("poller '{}': from_block {from} is after to_block {to}", poller.id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log:
  level: debug
  components:
    chainingest-chains: trace
environment: testnet
chains:
  ethereum:
    family: evm
    chain_id: 2
    rpcs: ["https://eth.example", "https://eth-backup.example"]
    rate_limit: { period_ms: 1000, limit: 20 }
  solana:
    family: solana
    chain_id: 1
    rpcs: ["https://sol.example"]
pollers:
  - id: eth-logs
    chain: ethereum
    kind: logs
    from_block: 100
    addresses: ["0xbridge"]
    topics: ["0xpublish"]
  - id: sol-txs
    chain: solana
    kind: transactions
    finality: latest
    block_batch_size: 10
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.environment.as_deref(), Some("testnet"));

        let eth = &config.chains["ethereum"];
        assert_eq!(eth.family, Family::Evm);
        assert_eq!(eth.rpcs.len(), 2);
        assert_eq!(eth.request_timeout_ms, 10_000);
        let resilience = eth.resilience();
        assert_eq!(resilience.limit, 20);
        assert_eq!(resilience.period, Duration::from_secs(1));
        assert_eq!(resilience.attempts, 2);
        assert_eq!(resilience.circuit_breaker.failure_threshold, 5);

        let logs = config.pollers[0].poller_config();
        assert_eq!(logs.from_block, Some(100));
        assert_eq!(logs.finality, BlockTag::Finalized);
        assert_eq!(logs.block_batch_size, 100);
        assert_eq!(logs.interval, Duration::from_secs(5));

        assert_eq!(config.pollers[1].kind, PollerKind::Transactions);
        assert_eq!(config.pollers[1].poller_config().finality, BlockTag::Latest);
    }

    #[test]
    fn rejects_poller_on_unknown_chain() {
        let raw = r#"
chains:
  ethereum: { family: evm, chain_id: 2, rpcs: ["https://eth.example"] }
pollers:
  - { id: p, chain: polygon, kind: logs }
"#;
        let err = Config::from_yaml(raw).unwrap_err();
        assert!(err.to_string().contains("unknown chain"));
    }

    #[test]
    fn rejects_chain_without_rpcs_and_zero_batch() {
        let raw = r#"
chains:
  ethereum: { family: evm, chain_id: 2, rpcs: [] }
"#;
        assert!(Config::from_yaml(raw).is_err());

        let raw = r#"
chains:
  ethereum: { family: evm, chain_id: 2, rpcs: ["https://eth.example"] }
pollers:
  - { id: p, chain: ethereum, kind: logs, block_batch_size: 0 }
"#;
        assert!(Config::from_yaml(raw).is_err());
    }

    #[test]
    fn family_parses_from_flag() {
        assert_eq!("near".parse::<Family>().unwrap(), Family::Near);
        assert!("cosmos".parse::<Family>().is_err());
    }
}
