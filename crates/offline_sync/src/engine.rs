//! Sync engine for replaying queued writes.
//!
//! A sync pass snapshots the retryable operations once and replays them
//! strictly in queue order, one remote call at a time:
//!
//! - mark the operation `syncing`
//! - dispatch it to the remote store (bounded by the configured deadline)
//! - on success remove it; on failure mark it `failed` and move on
//!
//! A failing operation never stops the pass. Operations enqueued while a pass
//! runs are left for the next pass.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::operation::{OperationKind, OperationStatus, QueueId, QueuedOperation};
use crate::payload::Table;
use crate::persistence::KeyValueStore;
use crate::queue::OfflineQueue;
use crate::remote::RemoteStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Running totals reported after each attempt of a pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Operations replayed successfully so far
    pub synced: usize,
    /// Operations that failed so far
    pub failed: usize,
    /// Operations in the pass snapshot
    pub total: usize,
}

impl SyncProgress {
    /// Attempts settled so far.
    pub fn completed(&self) -> usize {
        self.synced + self.failed
    }

    /// Whether every operation of the snapshot has been attempted.
    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total
    }
}

/// One failed attempt, kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationFailure {
    pub queue_id: QueueId,
    pub table: Table,
    pub operation: OperationKind,
    pub error: SyncError,
}

/// Outcome of a sync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub total: usize,
    /// Per-operation errors; internal detail, not meant for end users
    pub failures: Vec<OperationFailure>,
}

impl SyncReport {
    /// Whether every attempted operation reached the remote store.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Whether the pass had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Short summary for status displays.
    pub fn summary(&self) -> String {
        match (self.synced, self.failed) {
            (0, 0) => "Nothing to sync".to_string(),
            (1, 0) => "1 change synced".to_string(),
            (synced, 0) => format!("{} changes synced", synced),
            (synced, failed) => format!("{} synced, {} failed", synced, failed),
        }
    }
}

/// Replays an `OfflineQueue` against a `RemoteStore`.
pub struct SyncEngine<K, R> {
    queue: Arc<OfflineQueue<K>>,
    remote: Arc<R>,
    call_timeout: Option<Duration>,
    max_operations_per_pass: Option<usize>,
}

impl<K: KeyValueStore, R: RemoteStore> SyncEngine<K, R> {
    /// Create an engine over a shared queue and remote store.
    pub fn new(queue: Arc<OfflineQueue<K>>, remote: Arc<R>, config: &SyncConfig) -> Self {
        Self {
            queue,
            remote,
            call_timeout: config.call_timeout(),
            max_operations_per_pass: config.max_operations_per_pass,
        }
    }

    /// The queue this engine drains.
    pub fn queue(&self) -> &Arc<OfflineQueue<K>> {
        &self.queue
    }

    /// The remote store writes are replayed against.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Run one pass over the retryable operations.
    ///
    /// `on_progress` is called after every attempt with the running totals.
    /// Remote failures are recorded in the report; only local storage errors
    /// abort the pass.
    pub async fn run_pass<F>(&self, on_progress: F) -> SyncResult<SyncReport>
    where
        F: FnMut(SyncProgress) + Send,
    {
        self.run_pass_with_limit(self.max_operations_per_pass, on_progress)
            .await
    }

    /// Run one pass over at most `limit` operations (all when `None`).
    pub async fn run_pass_with_limit<F>(
        &self,
        limit: Option<usize>,
        mut on_progress: F,
    ) -> SyncResult<SyncReport>
    where
        F: FnMut(SyncProgress) + Send,
    {
        let mut snapshot = self.queue.retryable_operations();
        if let Some(limit) = limit {
            snapshot.truncate(limit);
        }

        let mut report = SyncReport {
            total: snapshot.len(),
            ..Default::default()
        };
        if snapshot.is_empty() {
            return Ok(report);
        }

        tracing::info!("Starting sync pass over {} queued operations", report.total);

        for op in &snapshot {
            // The record may have been cleared since the snapshot was taken.
            if !self.queue.set_status(&op.queue_id, OperationStatus::Syncing)? {
                tracing::debug!(queue_id = %op.queue_id, "Operation left the queue before replay");
                report.total -= 1;
                continue;
            }

            match self.sync_operation(op).await {
                Ok(()) => {
                    self.queue.remove(&op.queue_id)?;
                    report.synced += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        queue_id = %op.queue_id,
                        table = %op.table,
                        operation = %op.operation,
                        "Replay failed: {}",
                        error
                    );
                    self.queue.set_status(&op.queue_id, OperationStatus::Failed)?;
                    report.failed += 1;
                    report.failures.push(OperationFailure {
                        queue_id: op.queue_id.clone(),
                        table: op.table,
                        operation: op.operation,
                        error,
                    });
                }
            }

            on_progress(SyncProgress {
                synced: report.synced,
                failed: report.failed,
                total: report.total,
            });
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Send one operation to the remote store, bounded by the call deadline.
    ///
    /// Does not touch the queue. Errors are always `Remote` or `Timeout`.
    pub async fn sync_operation(&self, op: &QueuedOperation) -> SyncResult<()> {
        match self.call_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, self.dispatch(op)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(deadline.as_millis() as u64)),
            },
            None => self.dispatch(op).await,
        }
    }

    async fn dispatch(&self, op: &QueuedOperation) -> SyncResult<()> {
        let record_id = || {
            op.record_id.as_deref().ok_or_else(|| {
                SyncError::Remote(format!("{} without record id", op.operation))
            })
        };

        match op.operation {
            OperationKind::Create => {
                let row = self
                    .remote
                    .insert(op.table, &op.data, &op.queue_id)
                    .await?;
                tracing::debug!(
                    queue_id = %op.queue_id,
                    remote_id = ?row.get("id"),
                    "Replayed create"
                );
            }
            OperationKind::Update => {
                self.remote
                    .update(op.table, record_id()?, &op.data)
                    .await?;
                tracing::debug!(queue_id = %op.queue_id, "Replayed update");
            }
            OperationKind::Delete => {
                self.remote.delete(op.table, record_id()?).await?;
                tracing::debug!(queue_id = %op.queue_id, "Replayed delete");
            }
        }
        Ok(())
    }
}
