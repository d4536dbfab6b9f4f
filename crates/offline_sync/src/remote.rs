//! Remote store capability.
//!
//! The system of record is external; this module only describes what the
//! sync engine needs from it. `MemoryRemoteStore` is an in-memory
//! implementation for development and tests, with switches to simulate an
//! unreachable network or a table that rejects writes.

use crate::operation::{OperationKind, QueueId};
use crate::payload::{Payload, Row, Table};
use anyhow::{anyhow, bail};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Create/update/delete access to the remote database.
///
/// Errors are opaque: network failures and validation failures are treated
/// the same way by the sync engine.
#[trait_variant::make(Send)]
pub trait RemoteStore: Send + Sync {
    /// Insert `data` into `table` and return the stored row.
    ///
    /// `idempotency_key` is stable across replays of the same queued write,
    /// so a backend can recognise a create it has already applied.
    async fn insert(
        &self,
        table: Table,
        data: &Payload,
        idempotency_key: &QueueId,
    ) -> anyhow::Result<Row>;

    /// Update the row `record_id` in `table` with `data`.
    async fn update(&self, table: Table, record_id: &str, data: &Payload) -> anyhow::Result<Row>;

    /// Delete the row `record_id` from `table`.
    async fn delete(&self, table: Table, record_id: &str) -> anyhow::Result<()>;
}

/// A call observed by `MemoryRemoteStore`, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCall {
    pub kind: OperationKind,
    pub table: Table,
    /// Record id for update/delete, assigned id for a successful create
    pub record_id: Option<String>,
    pub succeeded: bool,
}

#[derive(Default)]
struct RemoteState {
    tables: HashMap<Table, BTreeMap<String, Row>>,
    applied_creates: HashMap<QueueId, Row>,
    next_id: u64,
    offline: bool,
    rejecting: HashSet<Table>,
    calls: Vec<RemoteCall>,
}

/// In-memory implementation of `RemoteStore`.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<RemoteState>,
}

impl MemoryRemoteStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the network being down: every call fails.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make every write to `table` fail (or succeed again).
    pub fn set_rejecting(&self, table: Table, rejecting: bool) {
        let mut state = self.state();
        if rejecting {
            state.rejecting.insert(table);
        } else {
            state.rejecting.remove(&table);
        }
    }

    /// Insert a row directly, bypassing the call log.
    pub fn seed(&self, table: Table, record_id: impl Into<String>, mut row: Row) {
        let record_id = record_id.into();
        row.insert("id".to_string(), Value::String(record_id.clone()));
        self.state()
            .tables
            .entry(table)
            .or_default()
            .insert(record_id, row);
    }

    /// All rows of `table`, ordered by id.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.state()
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One row by id.
    pub fn row(&self, table: Table, record_id: &str) -> Option<Row> {
        self.state()
            .tables
            .get(&table)
            .and_then(|rows| rows.get(record_id).cloned())
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    fn check_reachable(state: &RemoteState, table: Table) -> anyhow::Result<()> {
        if state.offline {
            bail!("network unreachable");
        }
        if state.rejecting.contains(&table) {
            bail!("{table} rejected the write");
        }
        Ok(())
    }

    fn record(
        state: &mut RemoteState,
        kind: OperationKind,
        table: Table,
        record_id: Option<String>,
        succeeded: bool,
    ) {
        state.calls.push(RemoteCall {
            kind,
            table,
            record_id,
            succeeded,
        });
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn insert(
        &self,
        table: Table,
        data: &Payload,
        idempotency_key: &QueueId,
    ) -> anyhow::Result<Row> {
        let mut state = self.state();
        if let Err(e) = Self::check_reachable(&state, table) {
            Self::record(&mut state, OperationKind::Create, table, None, false);
            return Err(e);
        }

        if let Some(row) = state.applied_creates.get(idempotency_key).cloned() {
            let id = row.get("id").and_then(Value::as_str).map(str::to_string);
            Self::record(&mut state, OperationKind::Create, table, id, true);
            return Ok(row);
        }

        state.next_id += 1;
        let record_id = format!("{}-{}", table, state.next_id);
        let mut row = data.clone();
        row.insert("id".to_string(), Value::String(record_id.clone()));

        state
            .tables
            .entry(table)
            .or_default()
            .insert(record_id.clone(), row.clone());
        state
            .applied_creates
            .insert(idempotency_key.clone(), row.clone());
        Self::record(&mut state, OperationKind::Create, table, Some(record_id), true);
        Ok(row)
    }

    async fn update(&self, table: Table, record_id: &str, data: &Payload) -> anyhow::Result<Row> {
        let mut state = self.state();
        let result = Self::check_reachable(&state, table).and_then(|()| {
            let row = state
                .tables
                .get_mut(&table)
                .and_then(|rows| rows.get_mut(record_id))
                .ok_or_else(|| anyhow!("no row {record_id} in {table}"))?;
            for (field, value) in data {
                row.insert(field.clone(), value.clone());
            }
            Ok(row.clone())
        });
        Self::record(
            &mut state,
            OperationKind::Update,
            table,
            Some(record_id.to_string()),
            result.is_ok(),
        );
        result
    }

    async fn delete(&self, table: Table, record_id: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        let result = Self::check_reachable(&state, table).map(|()| {
            if let Some(rows) = state.tables.get_mut(&table) {
                rows.remove(record_id);
            }
        });
        Self::record(
            &mut state,
            OperationKind::Delete,
            table,
            Some(record_id.to_string()),
            result.is_ok(),
        );
        result
    }
}
