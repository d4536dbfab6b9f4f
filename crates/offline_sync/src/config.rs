//! Sync configuration.

use crate::operation::MAX_RETRIES;
use crate::queue_store::DEFAULT_QUEUE_KEY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the queue, the sync engine and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Key the queue is persisted under
    pub storage_key: String,
    /// Failed attempts after which an operation is no longer replayed
    pub max_retries: u32,
    /// Deadline for a single remote call in milliseconds (0 disables it)
    pub call_timeout_ms: u64,
    /// How long the final progress stays visible after a pass, in milliseconds
    pub progress_grace_ms: u64,
    /// Upper bound on operations replayed per pass (`None` = all retryable)
    pub max_operations_per_pass: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_QUEUE_KEY.to_string(),
            max_retries: MAX_RETRIES,
            call_timeout_ms: 30_000,
            progress_grace_ms: 3_000,
            max_operations_per_pass: None,
        }
    }
}

impl SyncConfig {
    /// Set the storage key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the progress grace period.
    pub fn with_progress_grace(mut self, grace: Duration) -> Self {
        self.progress_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Cap the number of operations replayed in one pass.
    pub fn with_max_operations_per_pass(mut self, limit: usize) -> Self {
        self.max_operations_per_pass = Some(limit);
        self
    }

    /// Per-call deadline, `None` when disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    /// Progress grace period.
    pub fn progress_grace(&self) -> Duration {
        Duration::from_millis(self.progress_grace_ms)
    }

    /// Load a JSON config file, falling back to defaults.
    ///
    /// A missing file is silent; an unreadable or unparseable one is logged.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read sync config {:?}, using defaults: {}", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str::<SyncConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to parse sync config, using defaults: {}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.storage_key, "offline_queue");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.progress_grace(), Duration::from_secs(3));
        assert_eq!(config.max_operations_per_pass, None);
    }

    #[test]
    fn test_config_builder() {
        let config = SyncConfig::default()
            .with_storage_key("queue_alt")
            .with_max_retries(5)
            .with_call_timeout(Duration::from_millis(250))
            .with_progress_grace(Duration::from_secs(1))
            .with_max_operations_per_pass(10);

        assert_eq!(config.storage_key, "queue_alt");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.call_timeout_ms, 250);
        assert_eq!(config.progress_grace_ms, 1000);
        assert_eq!(config.max_operations_per_pass, Some(10));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let config = SyncConfig::default().with_call_timeout(Duration::ZERO);
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("sync.json");
        std::fs::write(&path, r#"{"max_retries": 7}"#).unwrap();

        let config = SyncConfig::load_or_default(&path);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.call_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_missing_or_corrupt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("sync.json");
        assert_eq!(SyncConfig::load_or_default(&path), SyncConfig::default());

        std::fs::write(&path, "max_retries = 7").unwrap();
        assert_eq!(SyncConfig::load_or_default(&path), SyncConfig::default());
    }
}
