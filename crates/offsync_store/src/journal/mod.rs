//! Append-only journal store.
//!
//! Every change to the queue is one framed record appended to a byte
//! backend. Opening the store replays the journal to rebuild live items,
//! dead letters and cached content.
//!
//! ## Frame Format
//!
//! ```text
//! | magic "OSQJ" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is CBOR. The checksum covers header and payload.
//!
//! ## Recovery Policy
//!
//! - A truncated header or payload at the end is a torn write. It is cut
//!   off the backend and the journal opens with the records before it.
//! - A checksum mismatch, bad magic, unknown version or type, or a payload
//!   that does not decode is corruption. The journal refuses to open.
//!
//! ## Invariants
//!
//! - A record reaches the backend before the in-memory view changes
//! - Moving an item to the dead-letter set is a single record
//! - Compaction replaces the journal through [`StorageBackend::rewrite`],
//!   so a crash leaves either the old or the compacted journal

mod frame;
mod record;
mod scan;
mod state;

pub use frame::{
    compute_crc32, encode_frame, Frame, FrameReader, RecordType, JOURNAL_MAGIC, JOURNAL_VERSION,
};
pub use record::JournalRecord;
pub use scan::{scan, ScanReport};

use crate::error::{StoreError, StoreResult};
use crate::store::QueueStore;
use offsync_protocol::{
    DeadLetterItem, DeadLetterReason, ItemId, ItemPatch, ItemStatus, QueueItem,
};
use offsync_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use state::JournalState;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the journal inside a queue directory.
pub const JOURNAL_FILE_NAME: &str = "queue.journal";

/// Options for a journal store.
#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// Sync the backend after every record.
    pub sync_on_write: bool,
    /// Compact automatically once this many records are obsolete.
    pub compact_threshold: Option<u64>,
}

impl JournalOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold: Some(1024),
        }
    }

    /// Sets whether every record is synced to durable storage.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the automatic compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: u64) -> Self {
        self.compact_threshold = Some(threshold);
        self
    }

    /// Disables automatic compaction.
    pub fn without_auto_compaction(mut self) -> Self {
        self.compact_threshold = None;
        self
    }
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Size and record counts of an open journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalStats {
    /// Live items.
    pub live_items: usize,
    /// Dead letters.
    pub dead_letters: usize,
    /// Cached entries.
    pub cached_entries: usize,
    /// Records in the journal.
    pub records: u64,
    /// Records that no longer contribute to the state.
    pub obsolete_records: u64,
    /// Journal size in bytes.
    pub bytes: u64,
}

/// Result of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Records before compaction.
    pub records_before: u64,
    /// Records after compaction.
    pub records_after: u64,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

struct Inner<B> {
    backend: B,
    state: JournalState,
}

/// A queue store backed by an append-only journal.
///
/// # Example
///
/// ```rust
/// use offsync_protocol::{Action, MutationKind, QueueItem};
/// use offsync_storage::InMemoryBackend;
/// use offsync_store::{JournalOptions, JournalQueueStore, QueueStore};
///
/// let store = JournalQueueStore::open(InMemoryBackend::new(), JournalOptions::default()).unwrap();
/// let item = QueueItem::new(MutationKind::Session, Action::Update, b"{}".to_vec());
/// store.append(&item).unwrap();
///
/// let bytes = store.into_backend().data();
/// let reopened = JournalQueueStore::open(InMemoryBackend::with_data(bytes), JournalOptions::default()).unwrap();
/// assert_eq!(reopened.load_pending().unwrap()[0].id, item.id);
/// ```
pub struct JournalQueueStore<B: StorageBackend> {
    inner: Mutex<Inner<B>>,
    options: JournalOptions,
}

/// A journal store on a file.
pub type FileQueueStore = JournalQueueStore<FileBackend>;

impl<B: StorageBackend> JournalQueueStore<B> {
    /// Opens a journal on `backend`, replaying every record.
    ///
    /// A torn record at the end is cut off the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is corrupted or cannot be read.
    pub fn open(mut backend: B, options: JournalOptions) -> StoreResult<Self> {
        let replay = scan::replay(&backend)?;

        if replay.torn_tail {
            warn!(
                valid_bytes = replay.valid_bytes,
                total_bytes = replay.total_bytes,
                "dropping torn record at journal tail"
            );
            backend.truncate(replay.valid_bytes)?;
            backend.sync()?;
        }

        debug!(
            records = replay.state.records(),
            live = replay.state.live_len(),
            dead_letters = replay.state.dead_letters().len(),
            "journal replayed"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                backend,
                state: replay.state,
            }),
            options,
        })
    }

    /// Returns the options the store was opened with.
    pub fn options(&self) -> &JournalOptions {
        &self.options
    }

    /// Returns size and record counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn stats(&self) -> StoreResult<JournalStats> {
        let inner = self.inner.lock();
        Ok(JournalStats {
            live_items: inner.state.live_len(),
            dead_letters: inner.state.dead_letters().len(),
            cached_entries: inner.state.cache().len(),
            records: inner.state.records(),
            obsolete_records: inner.state.obsolete_records(),
            bytes: inner.backend.size()?,
        })
    }

    /// Rewrites the journal as the minimal set of records for the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written. The previous
    /// journal is intact in that case.
    pub fn compact(&self) -> StoreResult<CompactionReport> {
        let mut inner = self.inner.lock();
        Self::compact_locked(&mut inner)
    }

    /// Consumes the store and returns its backend.
    pub fn into_backend(self) -> B {
        self.inner.into_inner().backend
    }

    fn compact_locked(inner: &mut Inner<B>) -> StoreResult<CompactionReport> {
        let records_before = inner.state.records();
        let bytes_before = inner.backend.size()?;

        let snapshot = inner.state.snapshot_records();
        let mut data = Vec::new();
        for record in &snapshot {
            data.extend(encode_frame(record.record_type(), &record.encode_payload()?)?);
        }

        inner.backend.rewrite(&data)?;
        inner.state.set_records(snapshot.len() as u64);

        let report = CompactionReport {
            records_before,
            records_after: snapshot.len() as u64,
            bytes_before,
            bytes_after: data.len() as u64,
        };
        info!(
            records_before = report.records_before,
            records_after = report.records_after,
            bytes_after = report.bytes_after,
            "journal compacted"
        );
        Ok(report)
    }

    fn write(&self, inner: &mut Inner<B>, record: JournalRecord) -> StoreResult<()> {
        let frame = encode_frame(record.record_type(), &record.encode_payload()?)?;
        let offset = inner.backend.size()?;

        let written = inner.backend.append(&frame).and_then(|_| {
            if self.options.sync_on_write {
                inner.backend.flush()?;
                inner.backend.sync()?;
            }
            Ok(())
        });
        if let Err(err) = written {
            // Drop any partial frame so the next append starts on a boundary.
            if inner.backend.size().map_or(false, |size| size > offset) {
                let _ = inner.backend.truncate(offset);
            }
            return Err(err.into());
        }

        inner.state.apply(record);
        self.maybe_compact(inner);
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut Inner<B>) {
        let Some(threshold) = self.options.compact_threshold else {
            return;
        };
        if inner.state.obsolete_records() < threshold {
            return;
        }
        if let Err(err) = Self::compact_locked(inner) {
            warn!(error = %err, "automatic journal compaction failed");
        }
    }
}

impl JournalQueueStore<FileBackend> {
    /// Opens `<dir>/queue.journal`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the journal is corrupted.
    pub fn open_dir(dir: &Path, options: JournalOptions) -> StoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(&journal_path(dir))?;
        Self::open(backend, options)
    }
}

/// Returns the journal path inside a queue directory.
pub fn journal_path(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_FILE_NAME)
}

impl<B: StorageBackend> QueueStore for JournalQueueStore<B> {
    fn load_pending(&self) -> StoreResult<Vec<QueueItem>> {
        let mut inner = self.inner.lock();
        for id in inner.state.in_flight_ids() {
            debug!(item_id = %id, "resetting interrupted item to pending");
            let record = JournalRecord::Update {
                id,
                patch: ItemPatch::new().with_status(ItemStatus::Pending),
            };
            self.write(&mut inner, record)?;
        }
        Ok(inner.state.ordered_items())
    }

    fn append(&self, item: &QueueItem) -> StoreResult<ItemId> {
        let mut inner = self.inner.lock();
        self.write(&mut inner, JournalRecord::Append(item.clone()))?;
        Ok(item.id)
    }

    fn update(&self, id: ItemId, patch: &ItemPatch) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.contains(id) {
            return Err(StoreError::NotFound(id));
        }
        self.write(
            &mut inner,
            JournalRecord::Update {
                id,
                patch: patch.clone(),
            },
        )
    }

    fn remove(&self, id: ItemId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.contains(id) {
            return Ok(());
        }
        self.write(&mut inner, JournalRecord::Remove { id })
    }

    fn move_to_dead_letter(
        &self,
        item: &QueueItem,
        reason: DeadLetterReason,
    ) -> StoreResult<DeadLetterItem> {
        let dead = DeadLetterItem::new(item.clone(), reason);
        let mut inner = self.inner.lock();
        self.write(&mut inner, JournalRecord::DeadLetter(dead.clone()))?;
        Ok(dead)
    }

    fn dead_letter_count(&self) -> StoreResult<usize> {
        Ok(self.inner.lock().state.dead_letters().len())
    }

    fn dead_letter_items(&self) -> StoreResult<Vec<DeadLetterItem>> {
        Ok(self.inner.lock().state.dead_letters().to_vec())
    }

    fn purge_dead_letters(&self) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let purged = inner.state.dead_letters().len();
        if purged > 0 {
            self.write(&mut inner, JournalRecord::PurgeDeadLetters)?;
        }
        Ok(purged)
    }

    fn put_cached(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        self.write(
            &mut inner,
            JournalRecord::CachePut {
                key: key.to_string(),
                value: value.to_vec(),
            },
        )
    }

    fn get_cached(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().state.cache().get(key).cloned())
    }

    fn remove_cached(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.cache().contains_key(key) {
            return Ok(());
        }
        self.write(
            &mut inner,
            JournalRecord::CacheRemove {
                key: key.to_string(),
            },
        )
    }
}
