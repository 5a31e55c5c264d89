//! Test fixtures and store helpers.
//!
//! Provides temporary journal stores and helpers for simulating crashes.

use offsync_storage::InMemoryBackend;
use offsync_store::{FileQueueStore, JournalOptions, JournalQueueStore, StoreResult};
use std::path::Path;
use tempfile::TempDir;

/// A file-backed queue store in a temporary directory.
pub struct TestStore {
    /// The store instance.
    pub store: FileQueueStore,
    /// The temporary directory (kept alive to prevent cleanup).
    dir: TempDir,
}

impl TestStore {
    /// Creates an empty store in a fresh temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileQueueStore::open_dir(dir.path(), JournalOptions::default())
            .expect("Failed to open queue store");
        Self { store, dir }
    }

    /// Returns the queue directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Closes the store and opens it again from disk, as after a restart.
    pub fn reopen(self) -> Self {
        let Self { store, dir } = self;
        drop(store);
        let store = FileQueueStore::open_dir(dir.path(), JournalOptions::default())
            .expect("Failed to reopen queue store");
        Self { store, dir }
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens an empty journal store on an in-memory backend.
pub fn memory_journal() -> JournalQueueStore<InMemoryBackend> {
    JournalQueueStore::open(InMemoryBackend::new(), JournalOptions::default())
        .expect("Failed to open in-memory journal")
}

/// Returns the raw journal bytes of a store, as a crash would leave them.
pub fn crash_image(store: JournalQueueStore<InMemoryBackend>) -> Vec<u8> {
    store.into_backend().data()
}

/// Opens a journal store from raw bytes.
pub fn reopen_image(bytes: Vec<u8>) -> StoreResult<JournalQueueStore<InMemoryBackend>> {
    JournalQueueStore::open(InMemoryBackend::with_data(bytes), JournalOptions::default())
}
