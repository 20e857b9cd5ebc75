//! Token bucket rate limiter.
//!
//! Admits at most `limit` calls per `period`: the bucket holds `limit`
//! tokens and refills continuously at `limit / period`. Each call consumes
//! one token; when none is available [`RateLimiter::try_acquire`] returns
//! `false` and the caller decides whether to wait or fail.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Window over which `limit` calls are admitted.
    pub period: Duration,
    /// Calls admitted per `period`.
    pub limit: u32,
}

impl RateLimiterConfig {
    fn refill_per_sec(&self) -> f64 {
        let secs = self.period.as_secs_f64();
        if secs <= 0.0 {
            f64::INFINITY
        } else {
            f64::from(self.limit) / secs
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            limit: 20,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = f64::from(config.limit);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_within_limit() {
        let rl = RateLimiter::new(RateLimiterConfig {
            period: Duration::from_secs(10),
            limit: 10,
        });
        for _ in 0..10 {
            assert!(rl.try_acquire(), "should succeed within limit");
        }
        assert!(!rl.try_acquire(), "should be rate limited");
    }

    #[test]
    fn refills_over_period() {
        let rl = RateLimiter::new(RateLimiterConfig {
            period: Duration::from_millis(20),
            limit: 1,
        });
        assert!(rl.try_acquire());
        assert!(!rl.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(rl.try_acquire());
    }
}
