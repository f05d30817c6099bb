//! Relay Orchestrator
//!
//! Owns the scheduler fleet: verifies connectivity at startup, spawns one
//! polling task per source and coordinates graceful shutdown.

use crate::domain::store::OutboxStore;
use crate::messaging::publisher::BrokerPublisher;
use crate::relay::scheduler::PollingScheduler;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("broker unreachable: {0}")]
    BrokerUnreachable(String),

    #[error("no source database reachable")]
    NoSourcesReachable,

    #[error("relay is already running")]
    AlreadyRunning,
}

/// Snapshot of the relay for health endpoints and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub monitored_services: Vec<String>,
    pub broker_status: String,
    pub is_running: bool,
    /// Seconds between polls, exposed as `pollingInterval`
    #[serde(rename = "pollingInterval")]
    pub polling_interval_secs: u64,
}

struct SchedulerSlot {
    scheduler: Arc<PollingScheduler>,
    store: Arc<dyn OutboxStore>,
    reachable: bool,
}

/// Coordinates the per-source schedulers against one broker.
pub struct RelayOrchestrator {
    broker: Arc<dyn BrokerPublisher>,
    slots: Vec<SchedulerSlot>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayOrchestrator {
    pub fn new(
        broker: Arc<dyn BrokerPublisher>,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broker,
            slots: Vec::new(),
            poll_interval,
            shutdown_timeout,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&mut self, scheduler: Arc<PollingScheduler>, store: Arc<dyn OutboxStore>) {
        self.slots.push(SchedulerSlot {
            scheduler,
            store,
            reachable: false,
        });
    }

    /// Probe the broker and every source database.
    ///
    /// The broker must answer: without it nothing can be delivered. Source
    /// databases may be down at startup; their schedulers still start and
    /// pick the source up once it answers, as long as at least one source
    /// is reachable now.
    pub async fn initialize(&mut self) -> Result<(), RelayError> {
        if let Err(e) = self.broker.ping().await {
            return Err(RelayError::BrokerUnreachable(e.to_string()));
        }
        info!("Broker connection verified");

        let mut reachable = 0usize;
        for slot in &mut self.slots {
            match slot.store.ping().await {
                Ok(()) => {
                    slot.reachable = true;
                    reachable += 1;
                    info!(source = %slot.scheduler.source(), "Source database verified");
                }
                Err(e) => {
                    warn!(
                        source = %slot.scheduler.source(),
                        error = %e,
                        "Source database unreachable at startup, will keep polling"
                    );
                }
            }
        }

        if reachable == 0 {
            return Err(RelayError::NoSourcesReachable);
        }

        info!(
            sources = self.slots.len(),
            reachable,
            "Relay initialized"
        );
        Ok(())
    }

    /// Spawn one polling task per registered source.
    pub async fn start_polling(&self) -> Result<(), RelayError> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(RelayError::AlreadyRunning);
        }

        for slot in &self.slots {
            let scheduler = slot.scheduler.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(scheduler.run(shutdown_rx)));
        }

        info!(schedulers = handles.len(), "Polling started");
        Ok(())
    }

    /// Signal shutdown and wait for in-flight cycles, up to the timeout.
    ///
    /// Tasks still running after the deadline are aborted; the stale-claim
    /// sweep recovers any rows they had claimed.
    pub async fn shutdown(&self) {
        info!("Shutting down relay");
        let _ = self.shutdown_tx.send(true);

        let mut handles = self.handles.lock().await;
        for mut handle in handles.drain(..) {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Scheduler task panicked during shutdown"),
                Err(_) => {
                    warn!("Scheduler did not stop within the shutdown timeout, aborting");
                    handle.abort();
                }
            }
        }

        info!("Relay stopped");
    }

    pub async fn is_running(&self) -> bool {
        let handles = self.handles.lock().await;
        handles.iter().any(|h| !h.is_finished())
    }

    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            monitored_services: self
                .slots
                .iter()
                .map(|s| s.scheduler.source().to_string())
                .collect(),
            broker_status: match self.broker.ping().await {
                Ok(()) => "connected".to_string(),
                Err(e) => format!("unreachable: {e}"),
            },
            is_running: self.is_running().await,
            polling_interval_secs: self.poll_interval.as_secs(),
        }
    }

    /// Per-source queue statistics for operational visibility.
    pub async fn backlog(&self) -> HashMap<String, u64> {
        let mut backlog = HashMap::new();
        for slot in &self.slots {
            if let Ok(count) = slot.store.count_pending().await {
                backlog.insert(slot.scheduler.source().to_string(), count);
            }
        }
        backlog
    }
}
