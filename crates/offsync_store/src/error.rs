//! Error types for queue store operations.

use offsync_protocol::ItemId;
use offsync_storage::StorageError;
use thiserror::Error;

/// Result type for queue store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a queue store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The byte backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal holds bytes that are not a valid record.
    #[error("journal corruption: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A complete frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// No live item has this id.
    #[error("item not found: {0}")]
    NotFound(ItemId),

    /// The store cannot accept operations right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Returns true if repeating the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_) | StoreError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::Storage(StorageError::Closed).is_retryable());
        assert!(StoreError::Unavailable("disk full".into()).is_retryable());
        assert!(!StoreError::corrupted("bad magic").is_retryable());
        assert!(!StoreError::NotFound(ItemId::new()).is_retryable());
    }

    #[test]
    fn checksum_display_is_hex() {
        let err = StoreError::ChecksumMismatch {
            offset: 11,
            expected: 0xDEAD_BEEF,
            actual: 1,
        };
        let text = err.to_string();
        assert!(text.contains("0xdeadbeef"));
        assert!(text.contains("0x00000001"));
    }
}
