//! Connectivity monitor and sync orchestration.
//!
//! `SyncOrchestrator` turns connectivity transitions into sync passes and
//! publishes a [`SyncIndicator`] for status displays:
//!
//! - going online refreshes cached remote reads and starts a pass if writes
//!   are waiting
//! - going offline only flips the indicator; the queue keeps accepting writes
//! - at most one pass runs at a time; extra triggers are ignored
//! - the final progress stays visible for a grace period after a pass

use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncProgress, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::persistence::KeyValueStore;
use crate::remote::RemoteStore;
use crate::status::SyncStatusInfo;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Connectivity transition reported by the host environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityEvent {
    WentOnline,
    WentOffline,
}

/// Observable sync state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncIndicator {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Progress of the running pass, or of the last one during the grace period
    pub progress: Option<SyncProgress>,
    pub last_report: Option<SyncReport>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Hook invoked when connectivity returns, so cached remote reads are
/// refetched instead of trusted.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_all(&self);
}

impl<F> CacheInvalidator for F
where
    F: Fn() + Send + Sync,
{
    fn invalidate_all(&self) {
        self()
    }
}

/// Releases the single-pass flag when a pass task ends, including by panic
/// or cancellation.
struct PassGuard<K: KeyValueStore, R: RemoteStore> {
    engine: Arc<SyncEngine<K, R>>,
    state: Arc<watch::Sender<SyncIndicator>>,
    in_flight: Arc<AtomicBool>,
    completed: bool,
}

impl<K: KeyValueStore, R: RemoteStore> PassGuard<K, R> {
    fn finish(mut self) {
        self.completed = true;
    }
}

impl<K: KeyValueStore, R: RemoteStore> Drop for PassGuard<K, R> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::error!("Sync pass ended abnormally");
            if let Err(e) = self.engine.queue().recover_interrupted() {
                tracing::error!("Failed to recover interrupted operations: {}", e);
            }
        }
        self.state.send_if_modified(|s| {
            if !s.is_syncing {
                return false;
            }
            s.is_syncing = false;
            s.progress = None;
            true
        });
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Drives sync passes from connectivity events.
pub struct SyncOrchestrator<K, R> {
    engine: Arc<SyncEngine<K, R>>,
    state: Arc<watch::Sender<SyncIndicator>>,
    in_flight: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    progress_grace: Duration,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
}

impl<K, R> SyncOrchestrator<K, R>
where
    K: KeyValueStore + 'static,
    R: RemoteStore + 'static,
{
    /// Create an orchestrator. `online` is the connectivity known at startup.
    pub fn new(engine: SyncEngine<K, R>, config: &SyncConfig, online: bool) -> Self {
        let (state, _) = watch::channel(SyncIndicator {
            is_online: online,
            ..Default::default()
        });
        Self {
            engine: Arc::new(engine),
            state: Arc::new(state),
            in_flight: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            progress_grace: config.progress_grace(),
            invalidator: None,
        }
    }

    /// Register the hook run on every transition to online.
    pub fn with_cache_invalidator(mut self, invalidator: impl CacheInvalidator + 'static) -> Self {
        self.invalidator = Some(Arc::new(invalidator));
        self
    }

    /// The engine passes are run with.
    pub fn engine(&self) -> &Arc<SyncEngine<K, R>> {
        &self.engine
    }

    /// Watch the indicator.
    pub fn subscribe(&self) -> watch::Receiver<SyncIndicator> {
        self.state.subscribe()
    }

    /// Current indicator value.
    pub fn indicator(&self) -> SyncIndicator {
        self.state.borrow().clone()
    }

    /// Display summary combining the indicator with the queue contents.
    pub fn status_info(&self) -> SyncStatusInfo {
        let queue = self.engine.queue();
        SyncStatusInfo::from_parts(
            &self.indicator(),
            queue.pending_count(),
            queue.exhausted_operations().len(),
        )
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// React to a connectivity transition.
    ///
    /// Returns the handle of the pass started by a `WentOnline`, if any.
    pub fn handle_event(
        &self,
        event: ConnectivityEvent,
    ) -> Option<JoinHandle<SyncResult<SyncReport>>> {
        match event {
            ConnectivityEvent::WentOnline => {
                tracing::info!("Connectivity restored");
                self.state.send_modify(|s| s.is_online = true);
                if let Some(invalidator) = &self.invalidator {
                    invalidator.invalidate_all();
                }

                let pending = self.engine.queue().pending_count();
                if pending == 0 {
                    return None;
                }
                tracing::debug!("{} queued writes waiting, starting sync", pending);
                self.trigger_sync()
            }
            ConnectivityEvent::WentOffline => {
                tracing::info!("Connectivity lost, queueing writes locally");
                self.state.send_modify(|s| s.is_online = false);
                None
            }
        }
    }

    /// Start a pass in the background unless one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger_sync(&self) -> Option<JoinHandle<SyncResult<SyncReport>>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync pass already running, ignoring trigger");
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.send_modify(|s| {
            s.is_syncing = true;
            s.progress = Some(SyncProgress::default());
        });

        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        let guard = PassGuard {
            engine: Arc::clone(&self.engine),
            state: Arc::clone(&self.state),
            in_flight: Arc::clone(&self.in_flight),
            completed: false,
        };
        let generations = Arc::clone(&self.generation);
        let grace = self.progress_grace;

        Some(tokio::spawn(async move {
            let progress_state = Arc::clone(&state);
            let result = engine
                .run_pass(move |progress| {
                    progress_state.send_modify(|s| s.progress = Some(progress));
                })
                .await;

            state.send_modify(|s| {
                s.is_syncing = false;
                match &result {
                    Ok(report) => {
                        s.progress = Some(SyncProgress {
                            synced: report.synced,
                            failed: report.failed,
                            total: report.total,
                        });
                        s.last_report = Some(report.clone());
                        s.last_sync_at = Some(Utc::now());
                    }
                    Err(_) => s.progress = None,
                }
            });
            guard.finish();

            if let Err(e) = &result {
                tracing::error!("Sync pass aborted: {}", e);
            } else {
                let clear_state = Arc::clone(&state);
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if generations.load(Ordering::Acquire) == generation {
                        clear_state.send_modify(|s| {
                            if !s.is_syncing {
                                s.progress = None;
                            }
                        });
                    }
                });
            }

            result
        }))
    }

    /// Run a pass now and wait for it (manual "retry").
    ///
    /// Returns `None` if a pass is already running.
    pub async fn sync_now(&self) -> Option<SyncResult<SyncReport>> {
        let handle = self.trigger_sync()?;
        Some(match handle.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::Internal(e.to_string())),
        })
    }

    /// Consume connectivity events until the sender is dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<ConnectivityEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        tracing::debug!("Connectivity channel closed, orchestrator stopping");
    }
}
