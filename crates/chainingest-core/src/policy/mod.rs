//! Reusable building blocks for RPC reliability.
//!
//! The decorator applies them in this order on every attempt:
//! ```text
//! Call → [CircuitBreaker] → [RateLimiter] → delegate → (retry per [RetryPolicy])
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryPolicy};
