//! # offsync Storage
//!
//! Byte storage backends for the offsync queue journal.
//!
//! Storage backends are **opaque byte stores**: they do not interpret the
//! data they hold. The queue journal in `offsync_store` owns framing,
//! checksums and record decoding.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, rewrite)
//! - No knowledge of journal frames or queue records
//! - Must be `Send + Sync` so a store can be shared with the drain loop
//! - `rewrite` replaces the whole content atomically; it is the only
//!   primitive compaction relies on
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral queues
//! - [`FileBackend`] - For queues that must survive a restart
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
