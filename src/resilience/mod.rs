//! Resilience primitives guarding the publish path.

pub mod circuit_breaker;
pub mod retry_policy;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry_policy::{ErrorClass, RetryDecision, RetryPolicy};
