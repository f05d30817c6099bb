//! NATS JetStream broker client.
//!
//! Publishes envelopes to `<topic>.<partition_key>` subjects. JetStream
//! preserves publish order per subject, which is what gives records sharing
//! an aggregate their ordering guarantee.

use crate::messaging::envelope::EventEnvelope;
use crate::messaging::publisher::{BrokerPublisher, PublishError};
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// NATS connection configuration with production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_secs: u64,
    /// Request timeout in seconds (None = no timeout)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: Option<u64>,
    /// Client connection name
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            connection_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            name: Some("outbox-relay".to_string()),
        }
    }
}

fn default_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

const fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> Option<u64> {
    Some(30)
}

impl NatsConfig {
    pub fn primary_url(&self) -> &str {
        self.urls
            .first()
            .map(|s| s.as_str())
            .unwrap_or("nats://localhost:4222")
    }
}

/// JetStream-backed [`BrokerPublisher`].
pub struct NatsBrokerPublisher {
    client: Client,
    jetstream: JetStreamContext,
}

impl NatsBrokerPublisher {
    /// Connect to NATS and build a JetStream context.
    pub async fn connect(config: &NatsConfig) -> Result<Self, PublishError> {
        let mut options = ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs));

        if let Some(secs) = config.request_timeout_secs {
            options = options.request_timeout(Some(Duration::from_secs(secs)));
        }
        if let Some(name) = &config.name {
            options = options.name(name);
        }

        let client = options
            .connect(config.urls.join(","))
            .await
            .map_err(|e| PublishError::BrokerUnavailable(e.to_string()))?;

        info!(url = config.primary_url(), "Connected to NATS");

        let jetstream = async_nats::jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    /// Human-readable connection state for the status payload.
    pub fn connection_state(&self) -> String {
        self.client.connection_state().to_string()
    }
}

#[async_trait::async_trait]
impl BrokerPublisher for NatsBrokerPublisher {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let subject = format!("{topic}.{partition_key}");
        let payload = serde_json::to_vec(envelope)?;

        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| PublishError::BrokerUnavailable(e.to_string()))?;

        ack.await
            .map_err(|e| PublishError::BrokerUnavailable(e.to_string()))?;

        debug!(subject = %subject, event_id = %envelope.event_id, "JetStream publish acked");
        Ok(())
    }

    async fn ping(&self) -> Result<(), PublishError> {
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::BrokerUnavailable(e.to_string()))
    }
}
