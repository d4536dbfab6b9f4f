//! Durable queue store.
//!
//! Persists the ordered list of queued operations under a single key and
//! tells subscribers whenever a new list has been written. There is no
//! append API: callers read the whole list, change it in memory and write the
//! whole list back.

use crate::error::SyncResult;
use crate::operation::QueuedOperation;
use crate::persistence::KeyValueStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Default key the queue is stored under.
pub const DEFAULT_QUEUE_KEY: &str = "offline_queue";

type Observer = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Observer)>>,
}

impl ObserverRegistry {
    fn add(&self, observer: Observer) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    fn remove(&self, id: u64) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(observer_id, _)| *observer_id != id);
    }

    fn len(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer();
        }
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to stop
/// receiving notifications.
///
/// Dropping the handle does not unsubscribe.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    registry: Weak<ObserverRegistry>,
}

impl Subscription {
    /// Deregister the observer. A no-op if the store is already gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Whole-list persistence of queued operations over a `KeyValueStore`.
pub struct QueueStore<K> {
    backend: K,
    key: String,
    observers: Arc<ObserverRegistry>,
}

impl<K: KeyValueStore> QueueStore<K> {
    /// Create a store using [`DEFAULT_QUEUE_KEY`].
    pub fn new(backend: K) -> Self {
        Self::with_key(backend, DEFAULT_QUEUE_KEY)
    }

    /// Create a store persisting under a custom key.
    pub fn with_key(backend: K, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            observers: Arc::new(ObserverRegistry::default()),
        }
    }

    /// The key the queue is persisted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying key-value backend.
    pub fn backend(&self) -> &K {
        &self.backend
    }

    /// Load the persisted list in insertion order.
    ///
    /// Missing, unreadable or corrupt state yields an empty list. The host
    /// application keeps running with an empty queue rather than failing.
    pub fn load(&self) -> Vec<QueuedOperation> {
        self.load_for_update().unwrap_or_else(|e| {
            tracing::warn!("Failed to read offline queue, starting empty: {}", e);
            Vec::new()
        })
    }

    /// Load the list ahead of writing it back.
    ///
    /// A backend read error is returned instead of an empty list, so a write
    /// never replaces a queue that could not be read. Missing or corrupt
    /// content still counts as empty.
    pub(crate) fn load_for_update(&self) -> SyncResult<Vec<QueuedOperation>> {
        let Some(raw) = self.backend.get(&self.key)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<QueuedOperation>>(&raw) {
            Ok(operations) => Ok(operations),
            Err(e) => {
                tracing::warn!("Offline queue is corrupt, starting empty: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Overwrite the persisted list and notify observers.
    pub fn save(&self, operations: &[QueuedOperation]) -> SyncResult<()> {
        self.persist(operations)?;
        self.notify_observers();
        Ok(())
    }

    /// Overwrite the persisted list without notifying. Callers holding a lock
    /// persist first and notify once the lock is released.
    pub(crate) fn persist(&self, operations: &[QueuedOperation]) -> SyncResult<()> {
        let json = serde_json::to_string(operations)?;
        self.backend.set(&self.key, &json)?;
        tracing::trace!(count = operations.len(), "Offline queue persisted");
        Ok(())
    }

    pub(crate) fn notify_observers(&self) {
        self.observers.notify();
    }

    /// Register a callback invoked after every successful `save`.
    pub fn subscribe(&self, observer: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.observers.add(Arc::new(observer));
        Subscription {
            id,
            registry: Arc::downgrade(&self.observers),
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}
