//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      consecutive failures reach `failure_threshold`
//! - `Open` → `Half-Open`:   `open_duration` has elapsed
//! - `Half-Open` → `Closed`: `success_threshold` trial calls succeed
//! - `Half-Open` → `Open`:   a trial call fails
//!
//! In `Half-Open` exactly one trial call is admitted at a time through
//! [`CircuitBreaker::try_acquire`]. A trial whose outcome is never recorded
//! (its future was dropped) stops blocking new trials after another
//! `open_duration`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All calls rejected until `open_duration` has elapsed.
    Open,
    /// One trial call allowed to test the delegate.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening.
    pub failure_threshold: u32,
    /// Cool-down before transitioning to half-open.
    pub open_duration: Duration,
    /// Number of successful trial calls before closing.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

/// Thread-safe circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitInner>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                trial_started_at: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut CircuitInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.trial_started_at = None;
                    tracing::info!("circuit breaker → half-open");
                }
            }
        }
    }

    /// Returns the current state, transitioning Open→HalfOpen if the cool-down elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Ask to make a call. `true` admits it; the caller must then report
    /// the outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let trial_busy = inner
                    .trial_started_at
                    .is_some_and(|t| t.elapsed() < self.config.open_duration);
                if trial_busy {
                    false
                } else {
                    inner.trial_started_at = Some(Instant::now());
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_started_at = None;
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    tracing::info!("circuit breaker → closed");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(failures = inner.failure_count, "circuit breaker → open");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
                inner.trial_started_at = None;
                tracing::warn!("circuit breaker trial failed → open");
            }
            CircuitState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb(threshold: u32, open_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
            success_threshold: 1,
        })
    }

    #[test]
    fn starts_closed() {
        let c = cb(5, 60_000);
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.try_acquire());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let c = cb(3, 60_000);
        c.record_failure();
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Closed);
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Open);
        assert!(!c.try_acquire());
    }

    #[test]
    fn success_resets_failure_count() {
        let c = cb(3, 60_000);
        c.record_failure();
        c.record_failure();
        c.record_success();
        c.record_failure();
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_single_trial() {
        let c = cb(1, 20);
        c.record_failure();
        assert!(!c.try_acquire());
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(c.state(), CircuitState::HalfOpen);
        assert!(c.try_acquire());
        assert!(!c.try_acquire(), "second trial must wait for the first");

        c.record_success();
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.try_acquire());
    }

    #[test]
    fn failed_trial_reopens() {
        let c = cb(1, 20);
        c.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.try_acquire());
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Open);
        assert!(!c.try_acquire());
    }

    #[test]
    fn abandoned_trial_is_replaced_after_cool_down() {
        let c = cb(1, 20);
        c.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.try_acquire());
        // outcome never recorded
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.try_acquire());
    }
}
