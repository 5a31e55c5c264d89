//! In-memory view rebuilt by replaying the journal.

use super::record::JournalRecord;
use offsync_protocol::{DeadLetterItem, ItemId, ItemStatus, QueueItem};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Live items, dead letters and cache as of the last applied record.
#[derive(Debug, Default, Clone)]
pub(crate) struct JournalState {
    /// Live items keyed by append sequence.
    live: BTreeMap<u64, QueueItem>,
    index: HashMap<ItemId, u64>,
    dead: Vec<DeadLetterItem>,
    cache: BTreeMap<String, Vec<u8>>,
    next_seq: u64,
    /// Frames currently in the journal.
    records: u64,
}

impl JournalState {
    pub(crate) fn apply(&mut self, record: JournalRecord) {
        self.records += 1;
        match record {
            JournalRecord::Append(item) => match self.index.get(&item.id) {
                Some(seq) => {
                    self.live.insert(*seq, item);
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.index.insert(item.id, seq);
                    self.live.insert(seq, item);
                }
            },
            JournalRecord::Update { id, patch } => match self.index.get(&id) {
                Some(seq) => {
                    if let Some(item) = self.live.get_mut(seq) {
                        item.apply(&patch);
                    }
                }
                None => debug!(item_id = %id, "skipping update for item no longer live"),
            },
            JournalRecord::Remove { id } => self.drop_live(id),
            JournalRecord::DeadLetter(dead) => {
                self.drop_live(dead.id());
                self.dead.push(dead);
            }
            JournalRecord::PurgeDeadLetters => self.dead.clear(),
            JournalRecord::CachePut { key, value } => {
                self.cache.insert(key, value);
            }
            JournalRecord::CacheRemove { key } => {
                self.cache.remove(&key);
            }
        }
    }

    fn drop_live(&mut self, id: ItemId) {
        if let Some(seq) = self.index.remove(&id) {
            self.live.remove(&seq);
        }
    }

    pub(crate) fn contains(&self, id: ItemId) -> bool {
        self.index.contains_key(&id)
    }

    /// Live items oldest first, ties in append order.
    pub(crate) fn ordered_items(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.live.values().cloned().collect();
        items.sort_by_key(|item| item.enqueued_at);
        items
    }

    pub(crate) fn in_flight_ids(&self) -> Vec<ItemId> {
        self.live
            .values()
            .filter(|item| item.status == ItemStatus::InFlight)
            .map(|item| item.id)
            .collect()
    }

    pub(crate) fn dead_letters(&self) -> &[DeadLetterItem] {
        &self.dead
    }

    pub(crate) fn cache(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.cache
    }

    pub(crate) fn live_len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    /// Records that no longer contribute to the current state.
    pub(crate) fn obsolete_records(&self) -> u64 {
        let needed = (self.live.len() + self.dead.len() + self.cache.len()) as u64;
        self.records.saturating_sub(needed)
    }

    /// The minimal record sequence that rebuilds this state.
    pub(crate) fn snapshot_records(&self) -> Vec<JournalRecord> {
        let mut records = Vec::with_capacity(self.live.len() + self.dead.len() + self.cache.len());
        records.extend(self.live.values().cloned().map(JournalRecord::Append));
        records.extend(self.dead.iter().cloned().map(JournalRecord::DeadLetter));
        records.extend(self.cache.iter().map(|(key, value)| JournalRecord::CachePut {
            key: key.clone(),
            value: value.clone(),
        }));
        records
    }

    pub(crate) fn set_records(&mut self, records: u64) {
        self.records = records;
    }
}
