//! PostgreSQL implementations of the store adapter and dead letter sink.

pub mod postgres;
pub mod postgres_dlq;

pub use postgres::PostgresOutboxStore;
pub use postgres_dlq::PostgresDeadLetterSink;
