//! Error types for the offline sync crate.

use thiserror::Error;

/// Result type alias for queue and sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while queueing or replaying writes.
///
/// Only local failures (`Storage`, `Serialization`, `InvalidPayload`,
/// `Internal`) are ever returned to callers of the queue. `Remote` and
/// `Timeout` describe a single replay attempt and are absorbed by the sync
/// engine, which marks the operation failed instead of aborting the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The local key-value store could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The queue could not be encoded for persistence.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The payload was rejected at enqueue time.
    #[error("Invalid payload for {table}: {reason}")]
    InvalidPayload { table: String, reason: String },

    /// The remote store rejected or failed the call.
    #[error("Remote store error: {0}")]
    Remote(String),

    /// The remote store did not answer within the configured deadline.
    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    /// A background sync task ended abnormally.
    #[error("Sync task failed: {0}")]
    Internal(String),
}

impl SyncError {
    /// Build an `InvalidPayload` error.
    pub fn invalid_payload(table: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::InvalidPayload {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is scoped to one replay attempt and can be retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Remote(_) | SyncError::Timeout(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Remote(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Storage error: disk full");

        let err = SyncError::invalid_payload("clients", "missing field `name`");
        assert_eq!(
            err.to_string(),
            "Invalid payload for clients: missing field `name`"
        );

        let err = SyncError::Timeout(1500);
        assert_eq!(err.to_string(), "Remote call timed out after 1500 ms");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SyncError::Remote("503".to_string()).is_recoverable());
        assert!(SyncError::Timeout(10).is_recoverable());
        assert!(!SyncError::Storage("read-only".to_string()).is_recoverable());
        assert!(!SyncError::invalid_payload("cases", "empty").is_recoverable());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<()>("invalid json").unwrap_err();
        let err: SyncError = json_err.into();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err = anyhow::anyhow!("connection reset").context("insert into clients");
        let err: SyncError = err.into();
        assert_eq!(
            err,
            SyncError::Remote("insert into clients: connection reset".to_string())
        );
    }
}
