//! Dead Letter Model
//!
//! Entries for deliveries that exhausted their retries or hit a
//! non-retryable error. Entries are immutable once written; replaying them
//! is manual tooling outside this service.

use crate::domain::record::OutboxRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A permanently failed delivery, removed from the normal flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The original outbox record id
    pub record_id: Uuid,
    pub event_type: String,
    pub event_version: i32,
    pub aggregate_id: Option<Uuid>,
    pub payload: serde_json::Value,
    /// Topic the delivery was destined for
    pub target_topic: String,
    /// One message per failed attempt, oldest first
    pub error_history: Vec<String>,
    pub attempts: i32,
    pub record_created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Build an entry from a record that is about to be dead-lettered.
    ///
    /// `final_error` is the failure that triggered the decision; it is
    /// appended to the history carried on the record.
    pub fn from_record(record: &OutboxRecord, target_topic: &str, final_error: &str) -> Self {
        let mut error_history = record.error_history.clone();
        error_history.push(final_error.to_string());

        Self {
            record_id: record.id,
            event_type: record.event_type.clone(),
            event_version: record.event_version,
            aggregate_id: record.aggregate_id,
            payload: record.payload.clone(),
            target_topic: target_topic.to_string(),
            error_history,
            attempts: record.attempts + 1,
            record_created_at: record.created_at,
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn time_in_dlq(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.dead_lettered_at)
    }
}

/// Durable sink for permanently failed deliveries.
///
/// `send` must never propagate failure upward: a sink that cannot persist
/// the entry logs the problem and reports `false`, leaving the record in
/// `failed` so the next cycle retries it. Fail open toward retry, not
/// toward silent loss.
#[async_trait::async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist the entry. Returns `true` if the entry was durably absorbed.
    async fn send(&self, entry: DeadLetterEntry) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{OutboxStatus, RecordMetadata};

    #[test]
    fn test_entry_from_record_appends_final_error() {
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            event_type: "PaymentCaptured".to_string(),
            event_version: 2,
            aggregate_id: Some(Uuid::new_v4()),
            payload: serde_json::json!({"amount": 100}),
            metadata: RecordMetadata {
                source_service: "payments".to_string(),
                correlation_id: Some("corr-1".to_string()),
            },
            status: OutboxStatus::Failed,
            attempts: 4,
            error_history: vec![
                "timeout".to_string(),
                "timeout".to_string(),
                "connection refused".to_string(),
                "timeout".to_string(),
            ],
            last_error: Some("timeout".to_string()),
            next_attempt_at: None,
            created_at: Utc::now() - chrono::Duration::minutes(10),
            updated_at: Utc::now(),
            last_attempt_at: Some(Utc::now()),
            processed_at: None,
        };

        let entry = DeadLetterEntry::from_record(&record, "events.payments", "timeout");

        assert_eq!(entry.record_id, record.id);
        assert_eq!(entry.attempts, 5);
        assert_eq!(entry.error_history.len(), 5);
        assert_eq!(entry.error_history.last().unwrap(), "timeout");
        assert_eq!(entry.target_topic, "events.payments");
        assert_eq!(entry.event_version, 2);
    }
}
