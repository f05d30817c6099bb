//! Outbox Store Adapter Trait
//!
//! Abstraction over one physical outbox table in one source database.
//! A relay replica never needs a distributed lock: `claim` is a conditional
//! update, so concurrent replicas racing for the same rows simply claim
//! disjoint subsets.

use crate::domain::record::{OutboxError, OutboxRecord};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Store adapter for one source database's outbox table.
///
/// Per-row outcome methods commit independently; a batch is never atomic.
/// Any I/O error from the adapter is treated by callers as a whole-cycle
/// transient failure, not a per-row one.
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    /// Fetch up to `limit` eligible rows ordered by creation time.
    ///
    /// Eligible means `pending`, or `failed` with `next_attempt_at <= now`
    /// — unless an earlier row of the same aggregate is in flight or
    /// waiting out a backoff, in which case the whole aggregate is held
    /// back. FIFO order per source preserves per-aggregate causal order.
    async fn fetch_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Atomically transition rows from `pending`/`failed` to `processing`.
    ///
    /// Returns the ids actually claimed. Rows already claimed by a
    /// concurrent replica affect zero rows for the loser.
    async fn claim(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, OutboxError>;

    /// Mark broker-acked rows `published`.
    async fn mark_published(&self, ids: &[Uuid]) -> Result<(), OutboxError>;

    /// Finalize `published` rows to `completed`, setting `processed_at`.
    ///
    /// Idempotent: re-running after a crash between publish and commit is
    /// safe.
    async fn mark_completed(&self, ids: &[Uuid]) -> Result<(), OutboxError>;

    /// Record a failed delivery: status `failed`, attempts + 1, error
    /// appended to the history, retry scheduled at `next_attempt_at`.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    /// Move a row to `dlq` after the dead letter sink accepted it,
    /// recording the final failed attempt (attempts + 1, `error` appended)
    /// so the row and its dead letter entry agree.
    async fn mark_dead_lettered(&self, id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Return claimed rows to `pending` without touching their attempt
    /// counters. Used when the circuit breaker fast-fails so the row's
    /// retry budget is not consumed.
    async fn release(&self, ids: &[Uuid]) -> Result<(), OutboxError>;

    /// Revert `processing` rows older than `older_than` back to `pending`.
    ///
    /// Recovery sweep for rows abandoned by a crashed or force-stopped
    /// cycle. Returns the number of rows reverted.
    async fn release_stale(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, OutboxError>;

    /// Ids of rows left `published` by an interrupted commit phase.
    async fn published_ids(&self) -> Result<Vec<Uuid>, OutboxError>;

    /// Number of rows currently visible to a poller.
    async fn count_pending(&self) -> Result<u64, OutboxError>;

    /// Counts by status for monitoring.
    async fn stats(&self) -> Result<OutboxStats, OutboxError>;

    /// Connectivity probe used by orchestrator initialization.
    async fn ping(&self) -> Result<(), OutboxError>;
}

/// Counts by status for one outbox table
#[derive(Debug, Clone, Default)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub completed: u64,
    pub dead_lettered: u64,
    pub oldest_pending_age_seconds: Option<i64>,
}

impl OutboxStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.failed + self.completed + self.dead_lettered
    }

    pub fn has_backlog(&self) -> bool {
        self.pending > 0 || self.failed > 0
    }
}
