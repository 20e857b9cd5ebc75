//! Per-chain provider pool with round-robin selection and health tracking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HealthStatus, RpcTransport};

/// Configuration for the provider pool.
#[derive(Debug, Clone)]
pub struct ProviderPoolConfig {
    /// How long an offline provider is skipped before it is tried again.
    pub offline_cooldown: Duration,
}

impl Default for ProviderPoolConfig {
    fn default() -> Self {
        Self {
            offline_cooldown: Duration::from_secs(30),
        }
    }
}

/// Liveness of one RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHealth {
    pub url: String,
    pub healthy: bool,
    pub last_failure: Option<Instant>,
}

struct ProviderSlot {
    transport: Arc<dyn RpcTransport>,
    health: Mutex<ProviderHealth>,
}

impl ProviderSlot {
    fn health(&self) -> MutexGuard<'_, ProviderHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_eligible(&self, cooldown: Duration) -> bool {
        let health = self.health();
        health.healthy || health.last_failure.map_or(true, |t| t.elapsed() >= cooldown)
    }
}

/// A provider handed out by [`ProviderPool::get`].
#[derive(Clone)]
pub struct ProviderHandle {
    index: usize,
    transport: Arc<dyn RpcTransport>,
}

impl ProviderHandle {
    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("index", &self.index)
            .field("url", &self.url())
            .finish()
    }
}

/// Round-robin provider pool for one chain.
///
/// Offline providers are skipped until their cooldown elapses; no provider
/// is ever removed. When every provider is offline the least recently failed
/// one is handed out, so a pool with providers never refuses a caller.
/// All state is internally synchronized; callers share the pool via `Arc`.
pub struct ProviderPool {
    chain: String,
    slots: Vec<ProviderSlot>,
    cursor: AtomicUsize,
    config: ProviderPoolConfig,
}

impl ProviderPool {
    /// Build a pool from a list of transports.
    pub fn new(
        chain: impl Into<String>,
        transports: Vec<Arc<dyn RpcTransport>>,
        config: ProviderPoolConfig,
    ) -> Self {
        let slots = transports
            .into_iter()
            .map(|t| ProviderSlot {
                health: Mutex::new(ProviderHealth {
                    url: t.url().to_string(),
                    healthy: true,
                    last_failure: None,
                }),
                transport: t,
            })
            .collect();
        Self {
            chain: chain.into(),
            slots,
            cursor: AtomicUsize::new(0),
            config,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Number of providers in the pool.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the pool has no providers.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot of each provider's health.
    pub fn health_summary(&self) -> Vec<ProviderHealth> {
        self.slots.iter().map(|s| s.health().clone()).collect()
    }

    /// Pick a provider, starting from the round-robin cursor.
    pub fn get(&self) -> Result<ProviderHandle, TransportError> {
        if self.slots.is_empty() {
            return Err(TransportError::AllProvidersDown);
        }
        let len = self.slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for i in 0..len {
            let idx = (start + i) % len;
            if self.slots[idx].is_eligible(self.config.offline_cooldown) {
                return Ok(self.handle(idx));
            }
        }

        let idx = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.health().last_failure)
            .map(|(i, _)| i)
            .unwrap_or(start);
        tracing::warn!(
            chain = %self.chain,
            url = %self.slots[idx].transport.url(),
            "no healthy provider, using least recently failed"
        );
        Ok(self.handle(idx))
    }

    /// Mark a provider unhealthy.
    pub fn set_offline(&self, handle: &ProviderHandle) {
        let Some(slot) = self.slots.get(handle.index) else {
            return;
        };
        let mut health = slot.health();
        if health.healthy {
            tracing::warn!(chain = %self.chain, url = %health.url, "provider offline");
        }
        health.healthy = false;
        health.last_failure = Some(Instant::now());
    }

    /// Mark a provider healthy again.
    pub fn set_online(&self, handle: &ProviderHandle) {
        let Some(slot) = self.slots.get(handle.index) else {
            return;
        };
        let mut health = slot.health();
        if !health.healthy {
            tracing::info!(chain = %self.chain, url = %health.url, "provider back online");
        }
        health.healthy = true;
    }

    fn handle(&self, index: usize) -> ProviderHandle {
        ProviderHandle {
            index,
            transport: Arc::clone(&self.slots[index].transport),
        }
    }

    fn observe<T>(&self, handle: &ProviderHandle, result: &Result<T, TransportError>) {
        match result {
            Ok(_) => self.set_online(handle),
            Err(e) if e.is_retryable() => self.set_offline(handle),
            Err(_) => {}
        }
    }
}

#[async_trait]
impl RpcTransport for ProviderPool {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let provider = self.get()?;
        let result = provider.transport.send(req).await;
        self.observe(&provider, &result);
        result
    }

    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let provider = self.get()?;
        let result = provider.transport.send_batch(reqs).await;
        self.observe(&provider, &result);
        result
    }

    fn health(&self) -> HealthStatus {
        let healthy_count = self.slots.iter().filter(|s| s.health().healthy).count();
        match healthy_count {
            0 => HealthStatus::Unhealthy,
            n if n == self.slots.len() => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }

    fn url(&self) -> &str {
        &self.chain
    }
}
