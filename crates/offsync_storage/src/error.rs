//! Failures of the byte backends under a queue journal.

use std::io;
use thiserror::Error;

/// Result alias for backend calls.
pub type StorageResult<T> = Result<T, StorageError>;

/// Why a backend call failed.
///
/// The journal turns every variant into a store error; the engine then keeps
/// the affected items in memory and retries the write later.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system refused a read, write or rename.
    #[error("journal I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A frame read asked for bytes past the journal's end.
    #[error("journal read out of range: {len} bytes at {offset}, journal holds {size}")]
    OutOfRange {
        /// Start of the read.
        offset: u64,
        /// Bytes requested.
        len: usize,
        /// Journal length at the time of the read.
        size: u64,
    },

    /// Torn-tail repair asked to grow the journal instead of cutting it.
    #[error("cannot cut journal to {requested} bytes, it holds {size}")]
    TruncateGrows {
        /// Length asked for.
        requested: u64,
        /// Journal length at the time of the call.
        size: u64,
    },

    /// The backend accepts no writes, as when the volume is gone or full.
    #[error("journal backend is closed")]
    Closed,
}
