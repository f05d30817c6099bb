//! Polling Scheduler
//!
//! One scheduler per source database, driving the poll → claim → publish →
//! commit cycle on a fixed tick. Only one cycle is ever in flight: a slow
//! cycle delays the next tick but never overlaps it. Poll-level failures
//! are logged, counted and swallowed; the scheduler never takes the
//! process down.

use crate::domain::dead_letter::{DeadLetterEntry, DeadLetterSink};
use crate::domain::record::{OutboxError, OutboxRecord};
use crate::domain::store::OutboxStore;
use crate::messaging::publisher::{GuardedPublisher, PublishError};
use crate::resilience::retry_policy::{RetryDecision, RetryPolicy};
use crate::telemetry::RelayMetrics;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for one polling scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Logical source name (metric label)
    pub source: String,
    /// Maximum rows fetched per cycle
    pub batch_size: usize,
    /// Tick between cycles
    pub poll_interval: Duration,
    /// Concurrent publish workers per cycle
    pub max_in_flight: usize,
    /// Claims older than this revert to pending at cycle start
    pub stale_claim_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            source: "default".to_string(),
            batch_size: 50,
            poll_interval: Duration::from_secs(5),
            max_in_flight: 8,
            stale_claim_timeout: Duration::from_secs(300),
        }
    }
}

/// Counts of what one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub fetched: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Fast-failed by the open circuit; retry budget untouched
    pub skipped: usize,
    pub stale_reclaimed: u64,
}

impl CycleOutcome {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0 && self.stale_reclaimed == 0
    }
}

/// Per-source polling scheduler.
pub struct PollingScheduler {
    config: SchedulerConfig,
    store: Arc<dyn OutboxStore>,
    publisher: Arc<GuardedPublisher>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
    metrics: Arc<RelayMetrics>,
    wake: Arc<Notify>,
}

impl PollingScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn OutboxStore>,
        publisher: Arc<GuardedPublisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        retry: RetryPolicy,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            publisher,
            dead_letters,
            retry,
            metrics,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn source(&self) -> &str {
        &self.config.source
    }

    /// Handle that triggers a cycle without waiting for the next tick.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Run until the shutdown signal flips.
    ///
    /// Shutdown cancels the next tick immediately; an in-flight cycle runs
    /// to completion here (the orchestrator bounds that with a timeout and
    /// abandons the task afterwards — the stale-claim sweep recovers any
    /// rows left behind).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.config.source,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Polling scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.run_cycle().await {
                Ok(outcome) => {
                    self.metrics
                        .cycles_total
                        .with_label_values(&[self.config.source.as_str(), "ok"])
                        .inc();
                    if !outcome.is_empty() {
                        info!(
                            source = %self.config.source,
                            fetched = outcome.fetched,
                            published = outcome.published,
                            retried = outcome.retried,
                            dead_lettered = outcome.dead_lettered,
                            skipped = outcome.skipped,
                            "Cycle complete"
                        );
                    }
                }
                Err(e) => {
                    // Whole-cycle transient failure; the next tick retries.
                    self.metrics
                        .cycles_total
                        .with_label_values(&[self.config.source.as_str(), "error"])
                        .inc();
                    error!(source = %self.config.source, error = %e, "Cycle failed");
                }
            }
        }

        info!(source = %self.config.source, "Polling scheduler stopped");
    }

    /// One poll → claim → publish → commit pass.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, OutboxError> {
        let now = Utc::now();
        let mut outcome = CycleOutcome::default();

        outcome.stale_reclaimed = self
            .store
            .release_stale(self.config.stale_claim_timeout, now)
            .await?;
        if outcome.stale_reclaimed > 0 {
            warn!(
                source = %self.config.source,
                count = outcome.stale_reclaimed,
                "Reverted stale processing claims to pending"
            );
        }

        // Finish a commit phase a previous run may have been cut off in.
        let leftover = self.store.published_ids().await?;
        if !leftover.is_empty() {
            debug!(
                source = %self.config.source,
                count = leftover.len(),
                "Committing rows published by an interrupted cycle"
            );
            self.store.mark_completed(&leftover).await?;
        }

        let batch = self.store.fetch_batch(self.config.batch_size, now).await?;
        self.metrics
            .queue_depth
            .with_label_values(&[self.config.source.as_str()])
            .set(batch.len() as i64);
        if batch.is_empty() {
            return Ok(outcome);
        }
        outcome.fetched = batch.len();

        let wanted: Vec<Uuid> = batch.iter().map(|r| r.id).collect();
        let claimed = self.store.claim(&wanted).await?;
        let claimed_set: std::collections::HashSet<Uuid> = claimed.into_iter().collect();
        let records: Vec<OutboxRecord> = batch
            .into_iter()
            .filter(|r| claimed_set.contains(&r.id))
            .collect();

        // Fan out across partition keys; within one key records stay
        // sequential so the broker never sees them reordered.
        let groups = group_by_partition_key(records);
        let mut published_ids: Vec<Uuid> = Vec::new();
        let mut tasks = FuturesUnordered::new();
        let mut pending_groups = groups.into_iter();

        for group in pending_groups.by_ref().take(self.config.max_in_flight) {
            tasks.push(self.process_group(group));
        }

        while let Some(group_result) = tasks.next().await {
            let group_outcome = group_result?;
            published_ids.extend(group_outcome.published_ids);
            outcome.published += group_outcome.published;
            outcome.retried += group_outcome.retried;
            outcome.dead_lettered += group_outcome.dead_lettered;
            outcome.skipped += group_outcome.skipped;

            if let Some(group) = pending_groups.next() {
                tasks.push(self.process_group(group));
            }
        }

        // Commit phase: finalize everything the broker acked.
        self.store.mark_completed(&published_ids).await?;

        Ok(outcome)
    }

    /// Publish one partition-key group in order.
    ///
    /// A failed record stops the group: its successors are released back
    /// to pending untouched so they cannot overtake it.
    async fn process_group(&self, group: Vec<OutboxRecord>) -> Result<GroupOutcome, OutboxError> {
        let mut result = GroupOutcome::default();
        let mut records = group.into_iter();

        while let Some(record) = records.next() {
            match self.publisher.publish_record(&record).await {
                Ok(()) => {
                    self.store.mark_published(&[record.id]).await?;
                    result.published_ids.push(record.id);
                    result.published += 1;
                }
                Err(e) => {
                    self.handle_failure(&record, &e, &mut result).await?;
                    let rest: Vec<Uuid> = records.map(|r| r.id).collect();
                    if !rest.is_empty() {
                        result.skipped += rest.len();
                        self.store.release(&rest).await?;
                    }
                    break;
                }
            }
        }

        Ok(result)
    }

    async fn handle_failure(
        &self,
        record: &OutboxRecord,
        error: &PublishError,
        result: &mut GroupOutcome,
    ) -> Result<(), OutboxError> {
        if error.is_circuit_open() {
            // Fast-fail: give the row back without touching its budget.
            debug!(
                source = %self.config.source,
                record_id = %record.id,
                "Circuit open, releasing claim"
            );
            result.skipped += 1;
            return self.store.release(&[record.id]).await;
        }

        let attempts = record.attempts + 1;
        match self.retry.next_attempt(attempts, error.class()) {
            RetryDecision::Retry { delay } => {
                let next_attempt_at =
                    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                warn!(
                    source = %self.config.source,
                    record_id = %record.id,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Delivery failed, retry scheduled"
                );
                self.store
                    .mark_failed(record.id, &error.to_string(), next_attempt_at)
                    .await?;
                self.metrics
                    .events_total
                    .with_label_values(&[self.config.source.as_str(), "retried"])
                    .inc();
                result.retried += 1;
            }
            RetryDecision::DeadLetter => {
                let entry = DeadLetterEntry::from_record(
                    record,
                    self.publisher.topic(),
                    &error.to_string(),
                );
                if self.dead_letters.send(entry).await {
                    self.store
                        .mark_dead_lettered(record.id, &error.to_string())
                        .await?;
                    self.metrics
                        .events_total
                        .with_label_values(&[self.config.source.as_str(), "dead_lettered"])
                        .inc();
                    result.dead_lettered += 1;
                } else {
                    // Sink unavailable: keep the row failed so the next
                    // cycle re-runs the dead-letter decision.
                    let next_attempt_at = Utc::now()
                        + chrono::Duration::milliseconds(
                            self.retry.raw_delay(attempts).as_millis() as i64,
                        );
                    self.store
                        .mark_failed(record.id, &error.to_string(), next_attempt_at)
                        .await?;
                    result.retried += 1;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct GroupOutcome {
    published_ids: Vec<Uuid>,
    published: usize,
    retried: usize,
    dead_lettered: usize,
    skipped: usize,
}

/// Split a creation-ordered batch into per-partition-key groups,
/// preserving order both across first appearance and within each group.
fn group_by_partition_key(records: Vec<OutboxRecord>) -> Vec<Vec<OutboxRecord>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<OutboxRecord>> = Vec::new();

    for record in records {
        let key = record.partition_key();
        match index.get(&key) {
            Some(&i) => groups[i].push(record),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![record]);
            }
        }
    }

    groups
}
