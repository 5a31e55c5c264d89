//! Read-only journal scanning for operator tooling.

use super::frame::{FrameReader, RecordType};
use super::record::JournalRecord;
use super::state::JournalState;
use crate::error::StoreResult;
use offsync_protocol::{DeadLetterItem, QueueItem};
use offsync_storage::StorageBackend;
use std::collections::BTreeMap;

/// What a scan found in a journal.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Size of the journal in bytes.
    pub total_bytes: u64,
    /// Bytes covered by complete frames.
    pub valid_bytes: u64,
    /// True if the journal ends in an incomplete frame.
    pub torn_tail: bool,
    /// Number of complete frames.
    pub frames: u64,
    /// Frame count per record type name.
    pub frames_by_type: BTreeMap<&'static str, u64>,
    /// Live items the journal replays to, oldest first.
    pub items: Vec<QueueItem>,
    /// Dead letters the journal replays to.
    pub dead_letters: Vec<DeadLetterItem>,
    /// Cache keys the journal replays to.
    pub cache_keys: Vec<String>,
    /// Frames that no longer contribute to the replayed state.
    pub obsolete_records: u64,
}

pub(crate) struct Replay {
    pub(crate) state: JournalState,
    pub(crate) valid_bytes: u64,
    pub(crate) total_bytes: u64,
    pub(crate) torn_tail: bool,
    pub(crate) frames_by_type: BTreeMap<RecordType, u64>,
}

pub(crate) fn replay<B: StorageBackend + ?Sized>(backend: &B) -> StoreResult<Replay> {
    let mut reader = FrameReader::new(backend)?;
    let mut state = JournalState::default();
    let mut frames_by_type = BTreeMap::new();

    while let Some(frame) = reader.next_frame()? {
        let record = JournalRecord::decode_payload(frame.record_type, &frame.payload)?;
        *frames_by_type.entry(frame.record_type).or_insert(0) += 1;
        state.apply(record);
    }

    Ok(Replay {
        state,
        valid_bytes: reader.valid_len(),
        total_bytes: reader.total_len(),
        torn_tail: reader.torn_tail(),
        frames_by_type,
    })
}

/// Walks every frame of a journal without modifying it.
///
/// Checks magic, version, checksum and payload decoding of each frame and
/// replays the records to report the resulting queue.
///
/// # Errors
///
/// Returns the first corruption or decoding error found, or an error if
/// the backend cannot be read.
pub fn scan<B: StorageBackend + ?Sized>(backend: &B) -> StoreResult<ScanReport> {
    let replay = replay(backend)?;
    let state = &replay.state;

    Ok(ScanReport {
        total_bytes: replay.total_bytes,
        valid_bytes: replay.valid_bytes,
        torn_tail: replay.torn_tail,
        frames: state.records(),
        frames_by_type: replay
            .frames_by_type
            .iter()
            .map(|(t, n)| (t.name(), *n))
            .collect(),
        items: state.ordered_items(),
        dead_letters: state.dead_letters().to_vec(),
        cache_keys: state.cache().keys().cloned().collect(),
        obsolete_records: state.obsolete_records(),
    })
}
