//! Broker Publisher
//!
//! Converts a claimed record into a wire message and publishes it through
//! the circuit breaker. The trait is the seam tests plug their fakes into.

use crate::domain::record::OutboxRecord;
use crate::messaging::envelope::EventEnvelope;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::resilience::retry_policy::ErrorClass;
use crate::telemetry::RelayMetrics;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Failure publishing one event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("publish timed out: {0}")]
    Timeout(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Validation(String),

    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
}

impl PublishError {
    /// Map onto the retry policy's taxonomy. Circuit-open is transient but
    /// handled separately by the scheduler so the row's budget survives.
    pub fn class(&self) -> ErrorClass {
        match self {
            PublishError::BrokerUnavailable(_)
            | PublishError::Timeout(_)
            | PublishError::CircuitOpen(_) => ErrorClass::Transient,
            PublishError::Serialization(_) | PublishError::Validation(_) => {
                ErrorClass::NonRetryable
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PublishError::CircuitOpen(_))
    }
}

/// Raw broker transport: deliver one envelope under an ordering key.
#[async_trait::async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publish `envelope` to `topic`, partitioned by `partition_key`.
    ///
    /// Envelopes sharing a partition key must never be reordered by the
    /// implementation.
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError>;

    /// Connectivity probe for orchestrator initialization.
    async fn ping(&self) -> Result<(), PublishError>;
}

/// A publisher for one topic, guarded by one circuit breaker.
///
/// One instance per publish target; the breaker is never shared across
/// unrelated brokers.
pub struct GuardedPublisher {
    source: String,
    topic: String,
    broker: Arc<dyn BrokerPublisher>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<RelayMetrics>,
}

impl GuardedPublisher {
    pub fn new(
        source: impl Into<String>,
        topic: impl Into<String>,
        broker: Arc<dyn BrokerPublisher>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            source: source.into(),
            topic: topic.into(),
            broker,
            breaker,
            metrics,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Serialize and publish one record.
    ///
    /// Serialization happens before the breaker is consulted: a record the
    /// broker never saw must not count against the breaker, and its error
    /// class sends it straight to the dead letter sink.
    pub async fn publish_record(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        if record.event_type.trim().is_empty() {
            self.observe_outcome("error");
            return Err(PublishError::Validation(format!(
                "record {} has an empty event type",
                record.id
            )));
        }

        let envelope = EventEnvelope::from_record(record);
        let key = record.partition_key();
        let started = Instant::now();

        let result = self
            .breaker
            .execute(self.broker.publish(&self.topic, &key, &envelope))
            .await;

        self.metrics
            .circuit_breaker_state
            .with_label_values(&[self.breaker.name()])
            .set(self.breaker.state().as_gauge());

        match result {
            Ok(()) => {
                self.metrics
                    .publish_duration_seconds
                    .with_label_values(&[self.source.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                self.observe_outcome("published");
                debug!(
                    record_id = %record.id,
                    topic = %self.topic,
                    partition_key = %key,
                    "Event published"
                );
                Ok(())
            }
            Err(BreakerError::Open(name)) => {
                self.observe_outcome("skipped");
                Err(PublishError::CircuitOpen(name))
            }
            Err(BreakerError::Inner(e)) => {
                self.observe_outcome("error");
                Err(e)
            }
        }
    }

    fn observe_outcome(&self, outcome: &str) {
        self.metrics
            .events_total
            .with_label_values(&[self.source.as_str(), outcome])
            .inc();
    }
}
