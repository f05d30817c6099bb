//! Domain layer: outbox record model, store adapter seam and dead letter
//! model shared by every backend implementation.

pub mod dead_letter;
pub mod record;
pub mod store;

pub use dead_letter::{DeadLetterEntry, DeadLetterSink};
pub use record::{OutboxError, OutboxRecord, OutboxStatus, RecordMetadata};
pub use store::{OutboxStats, OutboxStore};
