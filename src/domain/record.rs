//! Outbox Record Model
//!
//! Domain model for outbox rows relayed by this service. The payload is an
//! opaque, schema-versioned JSON blob: the relay never decodes it, consumers
//! key their decoding off `event_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an outbox record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Record has been created but not yet picked up
    Pending,
    /// Record has been claimed by a relay cycle
    Processing,
    /// Record has been acked by the broker, awaiting commit
    Published,
    /// Delivery failed, scheduled for retry at `next_attempt_at`
    Failed,
    /// Record has been delivered and committed
    Completed,
    /// Record exhausted its retries and was dead-lettered
    Dlq,
}

impl OutboxStatus {
    /// Statuses that can never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Completed | OutboxStatus::Dlq)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "PENDING"),
            OutboxStatus::Processing => write!(f, "PROCESSING"),
            OutboxStatus::Published => write!(f, "PUBLISHED"),
            OutboxStatus::Failed => write!(f, "FAILED"),
            OutboxStatus::Completed => write!(f, "COMPLETED"),
            OutboxStatus::Dlq => write!(f, "DLQ"),
        }
    }
}

/// Error types for outbox operations
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Infrastructure error: {message}")]
    Infrastructure { message: String },
}

/// Metadata attached by the service that wrote the outbox row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Name of the originating service
    pub source_service: String,
    /// Correlation ID for distributed tracing
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// A view of an outbox row as read from a source database.
///
/// Rows are created by the owning domain transaction; this service is the
/// only writer afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub event_version: i32,
    pub aggregate_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub metadata: RecordMetadata,
    pub status: OutboxStatus,
    /// Number of failed delivery attempts so far
    pub attempts: i32,
    /// One entry per failed delivery, oldest first
    pub error_history: Vec<String>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Key used to route the record to an ordered broker partition.
    ///
    /// Records sharing an aggregate share a key, so the broker preserves
    /// their relative order. Records without an aggregate fall back to
    /// their own id.
    pub fn partition_key(&self) -> String {
        self.aggregate_id.unwrap_or(self.id).to_string()
    }

    /// Whether a poller may pick this record up at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self
                .next_attempt_at
                .map(|at| at <= now)
                .unwrap_or(true),
            _ => false,
        }
    }

    /// Age of the record since creation.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: OutboxStatus) -> OutboxRecord {
        OutboxRecord {
            id: Uuid::new_v4(),
            event_type: "OrderPlaced".to_string(),
            event_version: 1,
            aggregate_id: None,
            payload: serde_json::json!({"order_id": "o-1"}),
            metadata: RecordMetadata {
                source_service: "orders".to_string(),
                correlation_id: None,
            },
            status,
            attempts: 0,
            error_history: Vec::new(),
            last_error: None,
            next_attempt_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_attempt_at: None,
            processed_at: None,
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(OutboxStatus::Pending.to_string(), "PENDING");
        assert_eq!(OutboxStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(OutboxStatus::Dlq.to_string(), "DLQ");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OutboxStatus::Completed.is_terminal());
        assert!(OutboxStatus::Dlq.is_terminal());
        assert!(!OutboxStatus::Failed.is_terminal());
        assert!(!OutboxStatus::Published.is_terminal());
    }

    #[test]
    fn test_partition_key_prefers_aggregate() {
        let mut rec = record(OutboxStatus::Pending);
        assert_eq!(rec.partition_key(), rec.id.to_string());

        let agg = Uuid::new_v4();
        rec.aggregate_id = Some(agg);
        assert_eq!(rec.partition_key(), agg.to_string());
    }

    #[test]
    fn test_pending_is_eligible() {
        let rec = record(OutboxStatus::Pending);
        assert!(rec.is_eligible(Utc::now()));
    }

    #[test]
    fn test_failed_waits_for_next_attempt() {
        let mut rec = record(OutboxStatus::Failed);
        rec.next_attempt_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!rec.is_eligible(Utc::now()));

        rec.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(rec.is_eligible(Utc::now()));
    }

    #[test]
    fn test_terminal_never_eligible() {
        assert!(!record(OutboxStatus::Completed).is_eligible(Utc::now()));
        assert!(!record(OutboxStatus::Dlq).is_eligible(Utc::now()));
        assert!(!record(OutboxStatus::Processing).is_eligible(Utc::now()));
    }
}
