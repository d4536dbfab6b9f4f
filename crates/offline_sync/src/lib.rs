//! Offline write queue and synchronization.
//!
//! Writes made while the device is offline are captured in a durable queue
//! and replayed against the remote store, in order, once connectivity returns.
//!
//! # Modules
//!
//! - `operation`: queued operations, their ids and replay states
//! - `payload`: typed tables and enqueue-time payload validation
//! - `persistence`: key-value storage the queue is persisted in
//! - `queue_store`: whole-list persistence plus change notifications
//! - `queue`: the offline queue manager (enqueue, status, views)
//! - `remote`: the remote store capability
//! - `engine`: sync passes over the queue
//! - `monitor`: connectivity-driven orchestration and the sync indicator
//! - `status`: user-facing status summary
//! - `config`: tunables
//! - `error`: error types
//!
//! # Example
//!
//! ```
//! use offline_sync::{
//!     MemoryKeyValueStore, MemoryRemoteStore, OfflineQueue, OperationKind, SyncConfig,
//!     SyncEngine, Table,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = SyncConfig::default();
//! let queue = Arc::new(OfflineQueue::open(MemoryKeyValueStore::new(), &config).unwrap());
//! queue
//!     .enqueue(Table::Clients, OperationKind::Create, json!({"name": "Acme"}), None)
//!     .unwrap();
//! assert_eq!(queue.pending_count(), 1);
//!
//! let remote = Arc::new(MemoryRemoteStore::new());
//! let engine = SyncEngine::new(Arc::clone(&queue), remote, &config);
//! let report = engine.run_pass(|_| {}).await.unwrap();
//! assert_eq!(report.synced, 1);
//! assert!(queue.is_empty());
//! # });
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod operation;
pub mod payload;
pub mod persistence;
pub mod queue;
pub mod queue_store;
pub mod remote;
pub mod status;

// Re-export commonly used types
pub use config::SyncConfig;
pub use engine::{OperationFailure, SyncEngine, SyncProgress, SyncReport};
pub use error::{SyncError, SyncResult};
pub use monitor::{CacheInvalidator, ConnectivityEvent, SyncIndicator, SyncOrchestrator};
pub use operation::{OperationKind, OperationStatus, QueueId, QueuedOperation, MAX_RETRIES};
pub use payload::{Payload, Row, Table};
pub use persistence::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use queue::OfflineQueue;
pub use queue_store::{QueueStore, Subscription, DEFAULT_QUEUE_KEY};
pub use remote::{MemoryRemoteStore, RemoteCall, RemoteStore};
pub use status::{ConnectionStatus, SyncStatusInfo};
