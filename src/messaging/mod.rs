//! Broker-facing layer: wire envelope, publisher seam and the NATS
//! JetStream implementation.

pub mod envelope;
pub mod nats;
pub mod publisher;

pub use envelope::{EnvelopeMetadata, EventEnvelope};
pub use nats::{NatsBrokerPublisher, NatsConfig};
pub use publisher::{BrokerPublisher, GuardedPublisher, PublishError};
