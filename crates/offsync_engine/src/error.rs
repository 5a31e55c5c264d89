//! Error types for the sync engine.

use offsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors returned by the sync engine API.
///
/// The background drain loop never returns these; it records failures as
/// telemetry events and keeps going.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The queue store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The queue did not empty in time.
    #[error("queue not empty after {timeout:?}, {remaining} items left")]
    FlushTimeout {
        /// How long the caller waited.
        timeout: Duration,
        /// Items still queued.
        remaining: usize,
    },

    /// The engine was started outside a tokio runtime.
    #[error("no tokio runtime available to run the sync worker")]
    NoRuntime,

    /// The engine has been shut down.
    #[error("sync engine is shut down")]
    ShutDown,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_retryable(),
            SyncError::FlushTimeout { .. } => true,
            SyncError::NoRuntime | SyncError::ShutDown => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Store(StoreError::Unavailable("full".into())).is_retryable());
        assert!(SyncError::FlushTimeout {
            timeout: Duration::from_secs(1),
            remaining: 3,
        }
        .is_retryable());
        assert!(!SyncError::ShutDown.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::FlushTimeout {
            timeout: Duration::from_secs(2),
            remaining: 7,
        };
        assert!(err.to_string().contains("7 items left"));
        assert_eq!(SyncError::ShutDown.to_string(), "sync engine is shut down");
    }
}
