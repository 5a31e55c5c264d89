//! # offsync Store
//!
//! Durable storage for the offsync queue.
//!
//! The sync engine talks to storage only through the [`QueueStore`] trait.
//! A store holds three things:
//!
//! - live queue items, returned oldest first by [`QueueStore::load_pending`]
//! - the dead-letter set, written once per item and purged only by an operator
//! - cached content keyed by string
//!
//! ## Adapters
//!
//! - [`MemoryQueueStore`] - volatile, with simulated unavailability for tests
//! - [`JournalQueueStore`] - an append-only journal on any
//!   [`offsync_storage::StorageBackend`]; [`FileQueueStore`] is the
//!   file-backed variant
//!
//! ## Crash Safety
//!
//! A journal store writes one checksummed record per operation before it
//! changes its in-memory view. A record torn by a crash is dropped when the
//! journal is reopened, and items that were in flight come back as pending.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod journal;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use journal::{
    journal_path, scan, CompactionReport, FileQueueStore, JournalOptions, JournalQueueStore,
    JournalStats, ScanReport, JOURNAL_FILE_NAME,
};
pub use memory::MemoryQueueStore;
pub use store::QueueStore;
