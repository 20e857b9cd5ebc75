//! Wiring: endpoints → pools → chain repositories → decorators → pollers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use chainingest_chains::{ChainRegistry, EvmBlockRepository, NearBlockRepository, SolanaBlockRepository};
use chainingest_core::{
    ChainBlockRepository, IngestMetrics, ProviderPool, RateLimitedRepository, ResilienceConfig,
    RpcTransport,
};
use chainingest_http::HttpRpcClient;
use chainingest_poller::{
    LogsOptions, LogsSource, PollError, Poller, Sink, TransactionsOptions, TransactionsSource,
};

use crate::config::{ChainConfig, Config, Family, PollerKind};
use crate::metrics::OtelMetrics;

/// Writes every emitted record to the log as JSON.
pub struct LoggingSink;

#[async_trait]
impl<T: Serialize + Send + Sync + 'static> Sink<T> for LoggingSink {
    async fn publish(&self, poller: &str, items: Vec<T>) -> Result<(), PollError> {
        for item in &items {
            let record = serde_json::to_string(item).map_err(|e| PollError::Sink(e.to_string()))?;
            tracing::info!(poller, %record, "emitted");
        }
        Ok(())
    }
}

/// Wrap `registry` in the repository for `family`.
pub fn family_repository(family: Family, registry: ChainRegistry) -> Box<dyn ChainBlockRepository> {
    match family {
        Family::Evm => Box::new(EvmBlockRepository::new(registry)),
        Family::Solana => Box::new(SolanaBlockRepository::new(registry)),
        Family::Near => Box::new(NearBlockRepository::new(registry)),
    }
}

fn guarded_repository(
    name: &str,
    chain: &ChainConfig,
    metrics: Arc<dyn IngestMetrics>,
) -> anyhow::Result<Arc<dyn ChainBlockRepository>> {
    let transports = chain
        .rpcs
        .iter()
        .map(|url| {
            HttpRpcClient::new(url.as_str(), chain.http_config())
                .map(|client| Arc::new(client) as Arc<dyn RpcTransport>)
        })
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("building HTTP clients for {name}"))?;
    let pool = ProviderPool::new(name, transports, chain.pool_config());
    let registry = ChainRegistry::new().with_chain(name, chain.chain_id, Arc::new(pool));
    let resilience = chain.resilience();

    Ok(match chain.family {
        Family::Evm => guarded(EvmBlockRepository::new(registry), resilience, metrics),
        Family::Solana => guarded(SolanaBlockRepository::new(registry), resilience, metrics),
        Family::Near => guarded(NearBlockRepository::new(registry), resilience, metrics),
    })
}

fn guarded<R: ChainBlockRepository>(
    repo: R,
    config: ResilienceConfig,
    metrics: Arc<dyn IngestMetrics>,
) -> Arc<dyn ChainBlockRepository> {
    Arc::new(RateLimitedRepository::new(repo, config).with_metrics(metrics))
}

/// Run every configured poller until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let meter = opentelemetry::global::meter("chainingest");
    let metrics: Arc<dyn IngestMetrics> = Arc::new(OtelMetrics::new(&meter));

    let mut repositories: HashMap<&str, Arc<dyn ChainBlockRepository>> = HashMap::new();
    for (name, chain) in &config.chains {
        let repo = guarded_repository(name, chain, metrics.clone())?;
        tracing::info!(chain = %name, family = ?chain.family, rpcs = chain.rpcs.len(), "chain configured");
        repositories.insert(name.as_str(), repo);
    }

    let (stop, shutdown) = watch::channel(false);
    let sink = Arc::new(LoggingSink);
    let mut tasks = JoinSet::new();

    for entry in &config.pollers {
        let repo = repositories
            .get(entry.chain.as_str())
            .cloned()
            .with_context(|| format!("poller {} refers to unknown chain {}", entry.id, entry.chain))?;
        let chain_id = config.chains[&entry.chain].chain_id;

        match entry.kind {
            PollerKind::Logs => {
                let source = LogsSource::new(
                    repo.clone(),
                    LogsOptions {
                        addresses: entry.addresses.clone(),
                        topics: entry.topics.clone(),
                        chain: entry.chain.clone(),
                        chain_id,
                    },
                );
                let poller = Poller::new(entry.poller_config(), repo, source, sink.clone())
                    .with_metrics(metrics.clone());
                tasks.spawn(poller.run(shutdown.clone()));
            }
            PollerKind::Transactions => {
                let source = TransactionsSource::new(
                    repo.clone(),
                    TransactionsOptions {
                        addresses: entry.addresses.clone(),
                        topics: entry.topics.clone(),
                        chain: entry.chain.clone(),
                        chain_id,
                        environment: config.environment.clone(),
                    },
                );
                let poller = Poller::new(entry.poller_config(), repo, source, sink.clone())
                    .with_metrics(metrics.clone());
                tasks.spawn(poller.run(shutdown.clone()));
            }
        }
    }

    if tasks.is_empty() {
        tracing::warn!("no pollers configured, nothing to do");
        return Ok(());
    }
    tracing::info!(pollers = tasks.len(), "running, press Ctrl-C to stop");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("listening for Ctrl-C")?;
            tracing::info!("shutdown requested");
        }
        // every poller had a to_block and finished
        _ = wait_all(&mut tasks) => {}
    }
    let _ = stop.send(true);
    wait_all(&mut tasks).await;
    tracing::info!("all pollers stopped");
    Ok(())
}

async fn wait_all(tasks: &mut JoinSet<()>) {
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            tracing::error!(error = %e, "poller task panicked");
        }
    }
}
