//! Relay runtime: per-source polling schedulers under one orchestrator.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{RelayError, RelayOrchestrator, RelayStatus};
pub use scheduler::{CycleOutcome, PollingScheduler, SchedulerConfig};
