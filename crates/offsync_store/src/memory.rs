//! Volatile queue store.

use crate::error::{StoreError, StoreResult};
use crate::store::QueueStore;
use offsync_protocol::{
    DeadLetterItem, DeadLetterReason, ItemId, ItemPatch, ItemStatus, QueueItem,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<QueueItem>,
    dead: Vec<DeadLetterItem>,
    cache: HashMap<String, Vec<u8>>,
}

impl MemoryState {
    fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

/// A queue store that lives only as long as the process.
///
/// Useful in tests and for queues that need no durability. Calling
/// [`MemoryQueueStore::set_unavailable`] makes every operation fail with
/// [`StoreError::Unavailable`], which is how tests simulate a full disk.
///
/// # Example
///
/// ```rust
/// use offsync_protocol::{Action, MutationKind, QueueItem};
/// use offsync_store::{MemoryQueueStore, QueueStore};
///
/// let store = MemoryQueueStore::new();
/// let item = QueueItem::new(MutationKind::Answer, Action::Create, b"42".to_vec());
/// store.append(&item).unwrap();
/// assert_eq!(store.load_pending().unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryQueueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of live items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if no live items are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Returns a copy of a live item, as stored.
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<QueueItem> {
        let state = self.state.lock();
        state.position(id).map(|index| state.items[index].clone())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn load_pending(&self) -> StoreResult<Vec<QueueItem>> {
        self.check_available()?;
        let mut state = self.state.lock();
        for item in state.items.iter_mut() {
            if item.status == ItemStatus::InFlight {
                item.status = ItemStatus::Pending;
            }
        }
        let mut items = state.items.clone();
        items.sort_by_key(|item| item.enqueued_at);
        Ok(items)
    }

    fn append(&self, item: &QueueItem) -> StoreResult<ItemId> {
        self.check_available()?;
        let mut state = self.state.lock();
        match state.position(item.id) {
            Some(index) => state.items[index] = item.clone(),
            None => state.items.push(item.clone()),
        }
        Ok(item.id)
    }

    fn update(&self, id: ItemId, patch: &ItemPatch) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        let index = state.position(id).ok_or(StoreError::NotFound(id))?;
        state.items[index].apply(patch);
        Ok(())
    }

    fn remove(&self, id: ItemId) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some(index) = state.position(id) {
            state.items.remove(index);
        }
        Ok(())
    }

    fn move_to_dead_letter(
        &self,
        item: &QueueItem,
        reason: DeadLetterReason,
    ) -> StoreResult<DeadLetterItem> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some(index) = state.position(item.id) {
            state.items.remove(index);
        }
        let dead = DeadLetterItem::new(item.clone(), reason);
        state.dead.push(dead.clone());
        Ok(dead)
    }

    fn dead_letter_count(&self) -> StoreResult<usize> {
        self.check_available()?;
        Ok(self.state.lock().dead.len())
    }

    fn dead_letter_items(&self) -> StoreResult<Vec<DeadLetterItem>> {
        self.check_available()?;
        Ok(self.state.lock().dead.clone())
    }

    fn purge_dead_letters(&self) -> StoreResult<usize> {
        self.check_available()?;
        let mut state = self.state.lock();
        let purged = state.dead.len();
        state.dead.clear();
        Ok(purged)
    }

    fn put_cached(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        self.state
            .lock()
            .cache
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_cached(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.state.lock().cache.get(key).cloned())
    }

    fn remove_cached(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.state.lock().cache.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{Action, MutationKind, Timestamp};

    fn item_at(millis: u64) -> QueueItem {
        let mut item = QueueItem::new(MutationKind::Progress, Action::Update, vec![1]);
        item.enqueued_at = Timestamp::from_millis(millis);
        item
    }

    #[test]
    fn load_orders_by_enqueue_time_then_append_order() {
        let store = MemoryQueueStore::new();
        let late = item_at(300);
        let first_tie = item_at(100);
        let second_tie = item_at(100);
        store.append(&late).unwrap();
        store.append(&first_tie).unwrap();
        store.append(&second_tie).unwrap();

        let ids: Vec<ItemId> = store.load_pending().unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![first_tie.id, second_tie.id, late.id]);
    }

    #[test]
    fn load_resets_in_flight() {
        let store = MemoryQueueStore::new();
        let item = item_at(1);
        store.append(&item).unwrap();
        store
            .update(item.id, &ItemPatch::new().with_status(ItemStatus::InFlight))
            .unwrap();

        let loaded = store.load_pending().unwrap();
        assert_eq!(loaded[0].status, ItemStatus::Pending);
        assert_eq!(store.get(item.id).unwrap().status, ItemStatus::Pending);
    }

    #[test]
    fn update_unknown_is_not_found() {
        let store = MemoryQueueStore::new();
        let result = store.update(ItemId::new(), &ItemPatch::new().with_retry_count(1));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = MemoryQueueStore::new();
        let item = item_at(1);
        store.append(&item).unwrap();
        store.remove(item.id).unwrap();
        store.remove(item.id).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn dead_letter_moves_item() {
        let store = MemoryQueueStore::new();
        let item = item_at(1);
        store.append(&item).unwrap();

        let dead = store
            .move_to_dead_letter(&item, DeadLetterReason::ExhaustedRetries)
            .unwrap();
        assert_eq!(dead.id(), item.id);
        assert!(store.is_empty());
        assert_eq!(store.dead_letter_count().unwrap(), 1);

        assert_eq!(store.purge_dead_letters().unwrap(), 1);
        assert_eq!(store.dead_letter_count().unwrap(), 0);
    }

    #[test]
    fn unavailable_store_fails_everything() {
        let store = MemoryQueueStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.append(&item_at(1)),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load_pending().is_err());

        store.set_unavailable(false);
        store.append(&item_at(1)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cache_roundtrip() {
        let store = MemoryQueueStore::new();
        store.put_cached("deck:1", b"cards").unwrap();
        assert_eq!(store.get_cached("deck:1").unwrap().as_deref(), Some(&b"cards"[..]));
        store.remove_cached("deck:1").unwrap();
        assert!(store.get_cached("deck:1").unwrap().is_none());
    }
}
