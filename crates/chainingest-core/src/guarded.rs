//! Rate-limiting and circuit-breaking decorator over any chain repository.
//!
//! [`RateLimitedRepository`] holds a delegate [`ChainBlockRepository`] and
//! forwards every call through a per-chain guard:
//!
//! 1. an open breaker fails the call immediately (`CircuitOpen`),
//! 2. the token bucket admits at most `limit` calls per `period`,
//! 3. the breaker admits the call (one trial at a time when half-open),
//! 4. the delegate runs and its outcome is recorded on the breaker,
//! 5. retryable failures are retried up to `attempts` times, `interval` apart.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::metrics::{IngestMetrics, NoopMetrics};
use crate::policy::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter, RateLimiterConfig, RetryPolicy,
};
use crate::repository::{BlockMap, ChainBlockRepository};
use crate::types::{Block, BlockTag, Log, LogFilter, ReceiptTransaction, TxRef};

/// `{period, limit, interval, attempts}` plus the breaker settings.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Window over which `limit` calls are admitted.
    pub period: Duration,
    /// Calls admitted per `period` and chain.
    pub limit: u32,
    /// Spacing between retries.
    pub interval: Duration,
    /// Retries after the first try.
    pub attempts: u32,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            limit: 1000,
            interval: Duration::from_secs(1),
            attempts: 2,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

struct ChainGuard {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

/// Decorator adding rate limiting, retries and a circuit breaker to a
/// [`ChainBlockRepository`]. Guards are created lazily per chain.
pub struct RateLimitedRepository<R> {
    delegate: R,
    config: ResilienceConfig,
    guards: Mutex<HashMap<String, Arc<ChainGuard>>>,
    metrics: Arc<dyn IngestMetrics>,
}

impl<R: ChainBlockRepository> RateLimitedRepository<R> {
    pub fn new(delegate: R, config: ResilienceConfig) -> Self {
        Self {
            delegate,
            config,
            guards: Mutex::new(HashMap::new()),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn delegate(&self) -> &R {
        &self.delegate
    }

    /// Breaker state for `chain` (closed if the chain was never called).
    pub fn circuit_state(&self, chain: &str) -> CircuitState {
        self.guard(chain).breaker.state()
    }

    fn guard(&self, chain: &str) -> Arc<ChainGuard> {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = guards.entry(chain.to_string()).or_insert_with(|| {
            Arc::new(ChainGuard {
                limiter: RateLimiter::new(RateLimiterConfig {
                    period: self.config.period,
                    limit: self.config.limit,
                }),
                breaker: CircuitBreaker::new(self.config.circuit_breaker.clone()),
            })
        });
        Arc::clone(guard)
    }

    async fn execute<T, F, Fut>(&self, chain: &str, op: &'static str, call: F) -> Result<T, RepositoryError>
    where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Result<T, RepositoryError>> + Send,
    {
        let guard = self.guard(chain);
        let retry = RetryPolicy::fixed(self.config.attempts, self.config.interval);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if guard.breaker.state() == CircuitState::Open {
                return Err(RepositoryError::CircuitOpen { chain: chain.to_string() });
            }

            let result = if !guard.limiter.try_acquire() {
                Err(RepositoryError::RateLimited { chain: chain.to_string() })
            } else if !guard.breaker.try_acquire() {
                return Err(RepositoryError::CircuitOpen { chain: chain.to_string() });
            } else {
                let result = call().await;
                match &result {
                    Ok(_) => guard.breaker.record_success(),
                    Err(_) => guard.breaker.record_failure(),
                }
                self.metrics.record_rpc_call(chain, op, result.is_ok());
                result
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            chain,
                            op,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying repository call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(chain, op, attempt, error = %e, "repository call failed");
                        return Err(e);
                    }
                },
                Err(e) => {
                    tracing::error!(chain, op, error = %e, "repository call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<R: ChainBlockRepository> ChainBlockRepository for RateLimitedRepository<R> {
    async fn get_block_height(&self, chain: &str, finality: BlockTag) -> Result<u64, RepositoryError> {
        self.execute(chain, "get_block_height", || {
            self.delegate.get_block_height(chain, finality)
        })
        .await
    }

    async fn get_blocks(
        &self,
        chain: &str,
        numbers: &BTreeSet<u64>,
        include_transactions: bool,
    ) -> Result<BlockMap, RepositoryError> {
        self.execute(chain, "get_blocks", || {
            self.delegate.get_blocks(chain, numbers, include_transactions)
        })
        .await
    }

    async fn get_block(
        &self,
        chain: &str,
        block: BlockTag,
        include_transactions: bool,
    ) -> Result<Block, RepositoryError> {
        self.execute(chain, "get_block", || {
            self.delegate.get_block(chain, block, include_transactions)
        })
        .await
    }

    async fn get_filtered_logs(&self, chain: &str, filter: &LogFilter) -> Result<Vec<Log>, RepositoryError> {
        self.execute(chain, "get_filtered_logs", || {
            self.delegate.get_filtered_logs(chain, filter)
        })
        .await
    }

    async fn get_transaction_receipts(
        &self,
        chain: &str,
        txs: &BTreeSet<TxRef>,
    ) -> Result<HashMap<String, ReceiptTransaction>, RepositoryError> {
        self.execute(chain, "get_transaction_receipts", || {
            self.delegate.get_transaction_receipts(chain, txs)
        })
        .await
    }
}
