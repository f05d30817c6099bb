//! Wire envelope published to the broker.

use crate::domain::record::OutboxRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata block carried alongside every published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub source_service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// The message consumers receive.
///
/// The payload stays opaque; consumers decode it keyed off `event_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub metadata: EnvelopeMetadata,
}

impl EventEnvelope {
    pub fn from_record(record: &OutboxRecord) -> Self {
        Self {
            event_id: record.id,
            event_type: record.event_type.clone(),
            event_version: record.event_version,
            timestamp: Utc::now(),
            aggregate_id: record.aggregate_id,
            payload: record.payload.clone(),
            metadata: EnvelopeMetadata {
                source_service: record.metadata.source_service.clone(),
                correlation_id: record.metadata.correlation_id.clone(),
            },
        }
    }
}
