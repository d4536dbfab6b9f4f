//! Queued write operations.
//!
//! A [`QueuedOperation`] is the unit of durability and retry: one write the
//! user made while offline, waiting to be replayed against the remote store.
//! Records are persisted as a JSON array, so the field names here are part of
//! the on-disk format.

use crate::payload::{Payload, Table};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of failed attempts after which an operation stops being replayed.
pub const MAX_RETRIES: u32 = 3;

/// Opaque handle of a queued operation.
///
/// Formatted as `<millis>-<random suffix>`. The millisecond prefix keeps ids
/// roughly sortable for display; the suffix makes them unique even when many
/// writes are queued within the same millisecond.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    /// Generate a fresh id from the current clock.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    /// Generate a fresh id with the given creation time as prefix.
    pub fn generate_at(now: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", now.timestamp_millis(), &suffix[..12]))
    }

    /// Wrap an existing id (e.g. one read back from storage).
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of write; fixed when the operation is queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replay state of a queued operation.
///
/// ```text
/// pending ──► syncing ──► (removed)
///                │
///                ▼
///             failed ──► syncing ──► (removed) | failed (retry_count + 1)
/// ```
///
/// Removal is terminal: a replayed operation leaves the queue entirely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Queued, never attempted
    #[default]
    Pending,
    /// Replay in flight
    Syncing,
    /// Last attempt failed
    Failed,
}

/// A single write waiting to be replayed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub queue_id: QueueId,
    pub table: Table,
    pub operation: OperationKind,
    #[serde(default)]
    pub data: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedOperation {
    /// Create a fresh `pending` record stamped with the current time.
    pub fn new(
        table: Table,
        operation: OperationKind,
        data: Payload,
        record_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            queue_id: QueueId::generate_at(now),
            table,
            operation,
            data,
            record_id,
            timestamp: now.timestamp_millis(),
            status: OperationStatus::Pending,
            retry_count: 0,
        }
    }

    /// Creation time as a UTC datetime.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Whether the retry budget is used up.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.status == OperationStatus::Failed && self.retry_count >= max_retries
    }

    /// Whether a sync pass should attempt this operation.
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        match self.status {
            OperationStatus::Pending => true,
            OperationStatus::Failed => self.retry_count < max_retries,
            OperationStatus::Syncing => false,
        }
    }

    /// Apply a status transition. Entering `failed` consumes one retry.
    pub fn transition(&mut self, status: OperationStatus) {
        if status == OperationStatus::Failed {
            self.retry_count = self.retry_count.saturating_add(1);
        }
        self.status = status;
    }
}
