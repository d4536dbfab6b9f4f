//! Offline queue manager.
//!
//! `OfflineQueue` is the only writer of the persisted queue. Every mutation is
//! a read-modify-write of the whole list, serialized by an internal mutex so
//! two tasks in the same process cannot interleave their writes. Coordination
//! between processes sharing one storage location is not attempted.
//!
//! # State machine
//!
//! See [`OperationStatus`]: `pending` is only assigned at enqueue time (or by
//! an explicit [`OfflineQueue::requeue`]); replay moves records between
//! `syncing` and `failed` until they are removed or run out of retries.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::operation::{OperationKind, OperationStatus, QueueId, QueuedOperation};
use crate::payload::{self, Table};
use crate::persistence::KeyValueStore;
use crate::queue_store::{QueueStore, Subscription};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

/// Persistent queue of writes captured while offline.
pub struct OfflineQueue<K> {
    store: QueueStore<K>,
    max_retries: u32,
    write_lock: Mutex<()>,
}

impl<K: KeyValueStore> OfflineQueue<K> {
    /// Open the queue persisted in `backend` under `config.storage_key`.
    pub fn open(backend: K, config: &SyncConfig) -> SyncResult<Self> {
        Self::with_store(QueueStore::with_key(backend, config.storage_key.clone()), config)
    }

    /// Open the queue over an existing `QueueStore`.
    ///
    /// Records left in `syncing` by a previous process (crash mid-replay) are
    /// moved back to `pending` so the next pass attempts them again. Creates
    /// carry their queue id as an idempotency key so the remote store can
    /// drop the duplicate if the first attempt did land.
    pub fn with_store(store: QueueStore<K>, config: &SyncConfig) -> SyncResult<Self> {
        let queue = Self {
            store,
            max_retries: config.max_retries,
            write_lock: Mutex::new(()),
        };

        if let Err(e) = queue.recover_interrupted() {
            // The stored list is left untouched; later writes retry the read.
            tracing::warn!("Skipping recovery of interrupted operations: {}", e);
        }

        Ok(queue)
    }

    /// Move records stuck in `syncing` back to `pending`.
    ///
    /// Returns how many were moved. Used at startup and after a pass that
    /// ended abnormally.
    pub fn recover_interrupted(&self) -> SyncResult<usize> {
        let recovered = self.mutate(|ops| {
            let mut count = 0;
            for op in ops.iter_mut().filter(|op| op.status == OperationStatus::Syncing) {
                op.status = OperationStatus::Pending;
                count += 1;
            }
            (count > 0, count)
        })?;
        if recovered > 0 {
            tracing::info!("Recovered {} interrupted operations as pending", recovered);
        }
        Ok(recovered)
    }

    /// Run `f` over the persisted list and write it back if `f` reports a
    /// change. Observers are notified after the lock is released.
    ///
    /// A failed read aborts the mutation so the stored list is never
    /// replaced by one built from nothing.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<QueuedOperation>) -> (bool, T),
    ) -> SyncResult<T> {
        let (changed, result) = {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut ops = self.store.load_for_update()?;
            let (changed, result) = f(&mut ops);
            if changed {
                self.store.persist(&ops)?;
            }
            (changed, result)
        };

        if changed {
            self.store.notify_observers();
        }
        Ok(result)
    }

    /// Retry budget applied to failed operations.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The underlying store.
    pub fn store(&self) -> &QueueStore<K> {
        &self.store
    }

    // ========== Mutations ==========

    /// Validate a write and append it as `pending`.
    ///
    /// Returns the new operation's id. Fails with `InvalidPayload` if the data
    /// does not fit the table, or `Storage` if the local store is broken.
    pub fn enqueue(
        &self,
        table: Table,
        operation: OperationKind,
        data: Value,
        record_id: Option<&str>,
    ) -> SyncResult<QueueId> {
        let payload = payload::validate(table, operation, data, record_id)?;
        let op = QueuedOperation::new(table, operation, payload, record_id.map(str::to_string));
        let queue_id = op.queue_id.clone();

        self.mutate(|ops| {
            ops.push(op);
            (true, ())
        })?;

        tracing::debug!(%queue_id, %table, %operation, "Queued offline write");
        Ok(queue_id)
    }

    /// Delete an operation. Returns whether it was present.
    pub fn remove(&self, queue_id: &QueueId) -> SyncResult<bool> {
        self.mutate(|ops| {
            let before = ops.len();
            ops.retain(|op| &op.queue_id != queue_id);
            let removed = ops.len() != before;
            (removed, removed)
        })
    }

    /// Move an operation to `status`. Entering `failed` consumes one retry.
    ///
    /// Returns whether the operation was present; nothing is written if not.
    pub fn set_status(&self, queue_id: &QueueId, status: OperationStatus) -> SyncResult<bool> {
        self.mutate(|ops| match ops.iter_mut().find(|op| &op.queue_id == queue_id) {
            Some(op) => {
                op.transition(status);
                (true, true)
            }
            None => (false, false),
        })
    }

    /// Give a failed or exhausted operation a fresh retry budget.
    ///
    /// This is the manual recovery path; sync passes never reset counters.
    pub fn requeue(&self, queue_id: &QueueId) -> SyncResult<bool> {
        self.mutate(|ops| {
            match ops
                .iter_mut()
                .find(|op| &op.queue_id == queue_id && op.status == OperationStatus::Failed)
            {
                Some(op) => {
                    op.status = OperationStatus::Pending;
                    op.retry_count = 0;
                    (true, true)
                }
                None => (false, false),
            }
        })
    }

    /// Remove every operation that is not `pending`.
    ///
    /// This drops failed records (exhausted or not) and any in-flight
    /// `syncing` record; a pass that later settles a dropped record finds it
    /// absent and does nothing. Returns the number removed.
    pub fn clear_completed(&self) -> SyncResult<usize> {
        self.mutate(|ops| {
            let before = ops.len();
            ops.retain(|op| op.status == OperationStatus::Pending);
            let removed = before - ops.len();
            (removed > 0, removed)
        })
    }

    /// Empty the queue unconditionally.
    pub fn clear_all(&self) -> SyncResult<()> {
        self.mutate(|ops| {
            ops.clear();
            (true, ())
        })
    }

    // ========== Views ==========

    /// Every operation, in insertion order.
    pub fn operations(&self) -> Vec<QueuedOperation> {
        self.store.load()
    }

    /// Look up one operation.
    pub fn get(&self, queue_id: &QueueId) -> Option<QueuedOperation> {
        self.store
            .load()
            .into_iter()
            .find(|op| &op.queue_id == queue_id)
    }

    /// Total number of records, including exhausted ones.
    pub fn len(&self) -> usize {
        self.store.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of operations still waiting to reach the remote store.
    ///
    /// Counts `pending` and retryable `failed` records. In-flight `syncing`
    /// records and exhausted failures are not counted.
    pub fn pending_count(&self) -> usize {
        self.store
            .load()
            .iter()
            .filter(|op| op.is_retryable(self.max_retries))
            .count()
    }

    /// Operations the next sync pass should replay, in insertion order.
    pub fn retryable_operations(&self) -> Vec<QueuedOperation> {
        self.store
            .load()
            .into_iter()
            .filter(|op| op.is_retryable(self.max_retries))
            .collect()
    }

    /// Failed operations that still have retry budget.
    pub fn failed_operations(&self) -> Vec<QueuedOperation> {
        self.store
            .load()
            .into_iter()
            .filter(|op| op.status == OperationStatus::Failed && op.retry_count < self.max_retries)
            .collect()
    }

    /// Failed operations that will not be replayed again without `requeue`.
    pub fn exhausted_operations(&self) -> Vec<QueuedOperation> {
        self.store
            .load()
            .into_iter()
            .filter(|op| op.is_exhausted(self.max_retries))
            .collect()
    }

    // ========== Observers ==========

    /// Register a callback invoked after every persisted change.
    ///
    /// The callback takes no arguments; it signals "re-read the queue".
    pub fn subscribe(&self, observer: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::persistence::MemoryKeyValueStore;
    use crate::queue_store::DEFAULT_QUEUE_KEY;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_queue() -> OfflineQueue<MemoryKeyValueStore> {
        OfflineQueue::open(MemoryKeyValueStore::new(), &SyncConfig::default()).unwrap()
    }

    fn enqueue_client<K: KeyValueStore>(queue: &OfflineQueue<K>, name: &str) -> QueueId {
        queue
            .enqueue(Table::Clients, OperationKind::Create, json!({ "name": name }), None)
            .unwrap()
    }

    fn fail_times(queue: &OfflineQueue<MemoryKeyValueStore>, id: &QueueId, times: u32) {
        for _ in 0..times {
            queue.set_status(id, OperationStatus::Syncing).unwrap();
            queue.set_status(id, OperationStatus::Failed).unwrap();
        }
    }

    // ========== Enqueue Tests ==========

    #[test]
    fn test_enqueue_appends_pending() {
        let queue = make_queue();
        let id = enqueue_client(&queue, "Acme");

        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.table, Table::Clients);
        assert_eq!(op.data["name"], "Acme");
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_enqueue_ids_are_unique() {
        let queue = make_queue();
        let ids: HashSet<_> = (0..50)
            .map(|i| enqueue_client(&queue, &format!("Client {i}")))
            .collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(queue.len(), 50);
    }

    #[test]
    fn test_enqueue_rejects_invalid_payload() {
        let queue = make_queue();
        let err = queue
            .enqueue(Table::Clients, OperationKind::Update, json!({"name": "X"}), None)
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidPayload { .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_keeps_insertion_order() {
        let queue = make_queue();
        let a = enqueue_client(&queue, "A");
        let b = queue
            .enqueue(
                Table::Cases,
                OperationKind::Update,
                json!({"status": "closed"}),
                Some("case-1"),
            )
            .unwrap();
        let c = queue
            .enqueue(Table::Tasks, OperationKind::Delete, Value::Null, Some("task-9"))
            .unwrap();

        let order: Vec<_> = queue.operations().into_iter().map(|op| op.queue_id).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    // ========== Status Tests ==========

    #[test]
    fn test_set_status_failed_increments_only_target() {
        let queue = make_queue();
        let a = enqueue_client(&queue, "A");
        let b = enqueue_client(&queue, "B");
        let before_b = queue.get(&b).unwrap();

        assert!(queue.set_status(&a, OperationStatus::Failed).unwrap());

        let after_a = queue.get(&a).unwrap();
        assert_eq!(after_a.status, OperationStatus::Failed);
        assert_eq!(after_a.retry_count, 1);
        assert_eq!(queue.get(&b).unwrap(), before_b);
    }

    #[test]
    fn test_set_status_unknown_id_is_noop() {
        let queue = make_queue();
        enqueue_client(&queue, "A");

        let notified = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&notified);
        let _sub = queue.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let missing = QueueId::from_raw("0-missing");
        assert!(!queue.set_status(&missing, OperationStatus::Failed).unwrap());
        assert!(!queue.remove(&missing).unwrap());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retry_exhaustion() {
        let queue = make_queue();
        let id = enqueue_client(&queue, "A");

        fail_times(&queue, &id, 2);
        assert_eq!(queue.retryable_operations().len(), 1);
        assert_eq!(queue.failed_operations().len(), 1);

        fail_times(&queue, &id, 1);
        assert!(queue.retryable_operations().is_empty());
        assert!(queue.failed_operations().is_empty());
        assert_eq!(queue.exhausted_operations().len(), 1);
        assert_eq!(queue.operations().len(), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_pending_count_semantics() {
        let queue = make_queue();
        let _pending = enqueue_client(&queue, "pending");
        let syncing = enqueue_client(&queue, "syncing");
        let failed = enqueue_client(&queue, "failed");
        let exhausted = enqueue_client(&queue, "exhausted");

        queue.set_status(&syncing, OperationStatus::Syncing).unwrap();
        fail_times(&queue, &failed, 1);
        fail_times(&queue, &exhausted, 3);

        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_requeue_resets_budget() {
        let queue = make_queue();
        let id = enqueue_client(&queue, "A");
        fail_times(&queue, &id, 3);
        assert_eq!(queue.pending_count(), 0);

        assert!(queue.requeue(&id).unwrap());
        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(queue.pending_count(), 1);

        // Only failed records can be requeued
        assert!(!queue.requeue(&id).unwrap());
    }

    // ========== Clear Tests ==========

    #[test]
    fn test_clear_completed_keeps_only_pending() {
        let queue = make_queue();
        let pending = enqueue_client(&queue, "pending");
        let syncing = enqueue_client(&queue, "syncing");
        let failed = enqueue_client(&queue, "failed");

        queue.set_status(&syncing, OperationStatus::Syncing).unwrap();
        fail_times(&queue, &failed, 1);

        assert_eq!(queue.clear_completed().unwrap(), 2);
        let remaining: Vec<_> = queue.operations().into_iter().map(|op| op.queue_id).collect();
        assert_eq!(remaining, vec![pending]);
        assert_eq!(queue.clear_completed().unwrap(), 0);
    }

    #[test]
    fn test_clear_all() {
        let queue = make_queue();
        enqueue_client(&queue, "A");
        enqueue_client(&queue, "B");

        queue.clear_all().unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.pending_count(), 0);
    }

    // ========== Observer and Recovery Tests ==========

    #[test]
    fn test_observer_may_read_queue_during_notification() {
        let queue = Arc::new(make_queue());
        let seen_counts = Arc::new(Mutex::new(Vec::new()));

        let reader = Arc::clone(&queue);
        let sink = Arc::clone(&seen_counts);
        let sub = queue.subscribe(move || {
            sink.lock().unwrap().push(reader.pending_count());
        });

        let id = enqueue_client(&queue, "A");
        queue.remove(&id).unwrap();
        sub.unsubscribe();
        enqueue_client(&queue, "B");

        assert_eq!(*seen_counts.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_open_recovers_interrupted_operations() {
        let config = SyncConfig::default();
        let backend = MemoryKeyValueStore::new();
        let id = {
            let queue = OfflineQueue::open(MemoryKeyValueStore::new(), &config).unwrap();
            let id = enqueue_client(&queue, "A");
            queue.set_status(&id, OperationStatus::Syncing).unwrap();
            let raw = queue.store().backend().get(&config.storage_key).unwrap().unwrap();
            backend.set(&config.storage_key, &raw).unwrap();
            id
        };

        let queue = OfflineQueue::open(backend, &config).unwrap();
        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(queue.retryable_operations().len(), 1);
    }

    #[test]
    fn test_custom_retry_budget() {
        let config = SyncConfig::default().with_max_retries(1);
        let queue = OfflineQueue::open(MemoryKeyValueStore::new(), &config).unwrap();
        let id = enqueue_client(&queue, "A");

        fail_times(&queue, &id, 1);
        assert_eq!(queue.max_retries(), 1);
        assert!(queue.retryable_operations().is_empty());
    }

    /// Backend whose next `get` calls fail while `failures` is non-zero.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryKeyValueStore,
        failures: AtomicUsize,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> SyncResult<Option<String>> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SyncError::Storage("EIO".to_string()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> SyncResult<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> SyncResult<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_read_error_does_not_overwrite_queue() {
        let queue = OfflineQueue::open(FlakyStore::default(), &SyncConfig::default()).unwrap();
        let ids: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|name| enqueue_client(&queue, name))
            .collect();

        queue.store().backend().failures.store(1, Ordering::SeqCst);
        let err = queue
            .enqueue(Table::Clients, OperationKind::Create, json!({"name": "D"}), None)
            .unwrap_err();
        assert_eq!(err, SyncError::Storage("EIO".to_string()));
        assert_eq!(queue.len(), 3);

        queue.store().backend().failures.store(1, Ordering::SeqCst);
        assert!(queue.set_status(&ids[0], OperationStatus::Syncing).is_err());

        let stored: Vec<_> = queue.operations().into_iter().map(|op| op.queue_id).collect();
        assert_eq!(stored, ids);
        assert_eq!(queue.get(&ids[0]).unwrap().status, OperationStatus::Pending);
    }

    #[test]
    fn test_open_survives_read_error_without_writing() {
        let mut op = QueuedOperation::new(
            Table::Clients,
            OperationKind::Create,
            json!({"name": "A"}).as_object().cloned().unwrap(),
            None,
        );
        op.status = OperationStatus::Syncing;

        let backend = FlakyStore::default();
        let raw = serde_json::to_string(&[op.clone()]).unwrap();
        backend.inner.set(DEFAULT_QUEUE_KEY, &raw).unwrap();
        backend.failures.store(1, Ordering::SeqCst);

        let queue = OfflineQueue::open(backend, &SyncConfig::default()).unwrap();
        assert_eq!(queue.operations(), vec![op.clone()]);

        assert_eq!(queue.recover_interrupted().unwrap(), 1);
        assert_eq!(queue.get(&op.queue_id).unwrap().status, OperationStatus::Pending);
    }
}
