//! Outbox relay: drains transactional outbox tables into NATS JetStream.
//!
//! Application services write events into their own database inside the
//! same transaction as the state change; this relay polls those tables,
//! claims batches, publishes to the broker with per-aggregate ordering,
//! and retries or dead-letters what the broker rejects. Delivery is
//! at-least-once; consumers deduplicate by event id.

pub mod config;
pub mod domain;
pub mod messaging;
pub mod persistence;
pub mod relay;
pub mod resilience;
pub mod telemetry;

pub use config::{ConfigLoader, RelayConfig};
pub use domain::dead_letter::{DeadLetterEntry, DeadLetterSink};
pub use domain::record::{OutboxError, OutboxRecord, OutboxStatus};
pub use domain::store::{OutboxStats, OutboxStore};
pub use messaging::publisher::{BrokerPublisher, GuardedPublisher, PublishError};
pub use relay::{PollingScheduler, RelayOrchestrator, SchedulerConfig};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use resilience::retry_policy::{ErrorClass, RetryDecision, RetryPolicy};
