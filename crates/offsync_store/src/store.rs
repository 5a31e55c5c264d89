//! The queue store contract.

use crate::error::StoreResult;
use offsync_protocol::{DeadLetterItem, DeadLetterReason, ItemId, ItemPatch, QueueItem};
use std::sync::Arc;

/// Durable storage for queue items, dead letters and cached content.
///
/// A store is pure storage: it applies no retry or ordering policy beyond
/// returning live items oldest first. Every method may be called while the
/// drain loop is running, and a crash between two calls must not lose the
/// effect of the earlier one.
pub trait QueueStore: Send + Sync {
    /// Returns all live items ordered by `enqueued_at`, ties in append order.
    ///
    /// Items stored as in-flight are durably reset to pending first: an
    /// in-flight item seen here was interrupted by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the items cannot be read or the reset cannot be
    /// persisted.
    fn load_pending(&self) -> StoreResult<Vec<QueueItem>>;

    /// Persists a new item.
    ///
    /// Appending an id that is already live replaces the stored copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be persisted.
    fn append(&self, item: &QueueItem) -> StoreResult<ItemId>;

    /// Persists a partial update of a live item.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] for an unknown id, or an
    /// error if the update cannot be persisted.
    fn update(&self, id: ItemId, patch: &ItemPatch) -> StoreResult<()>;

    /// Deletes a completed item. Removing an unknown id succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be persisted.
    fn remove(&self, id: ItemId) -> StoreResult<()>;

    /// Moves an item to the dead-letter set and drops it from the live queue
    /// in one step.
    ///
    /// The item does not need to be live; an item that never reached the
    /// store is dead-lettered all the same.
    ///
    /// # Errors
    ///
    /// Returns an error if the move cannot be persisted. Neither side changes
    /// in that case.
    fn move_to_dead_letter(
        &self,
        item: &QueueItem,
        reason: DeadLetterReason,
    ) -> StoreResult<DeadLetterItem>;

    /// Returns the number of dead letters.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn dead_letter_count(&self) -> StoreResult<usize>;

    /// Returns all dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn dead_letter_items(&self) -> StoreResult<Vec<DeadLetterItem>>;

    /// Deletes every dead letter and returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge cannot be persisted.
    fn purge_dead_letters(&self) -> StoreResult<usize>;

    /// Stores cached content under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn put_cached(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Returns cached content for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_cached(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Deletes cached content for `key`. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be persisted.
    fn remove_cached(&self, key: &str) -> StoreResult<()>;
}

impl<S: QueueStore + ?Sized> QueueStore for Arc<S> {
    fn load_pending(&self) -> StoreResult<Vec<QueueItem>> {
        (**self).load_pending()
    }

    fn append(&self, item: &QueueItem) -> StoreResult<ItemId> {
        (**self).append(item)
    }

    fn update(&self, id: ItemId, patch: &ItemPatch) -> StoreResult<()> {
        (**self).update(id, patch)
    }

    fn remove(&self, id: ItemId) -> StoreResult<()> {
        (**self).remove(id)
    }

    fn move_to_dead_letter(
        &self,
        item: &QueueItem,
        reason: DeadLetterReason,
    ) -> StoreResult<DeadLetterItem> {
        (**self).move_to_dead_letter(item, reason)
    }

    fn dead_letter_count(&self) -> StoreResult<usize> {
        (**self).dead_letter_count()
    }

    fn dead_letter_items(&self) -> StoreResult<Vec<DeadLetterItem>> {
        (**self).dead_letter_items()
    }

    fn purge_dead_letters(&self) -> StoreResult<usize> {
        (**self).purge_dead_letters()
    }

    fn put_cached(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        (**self).put_cached(key, value)
    }

    fn get_cached(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get_cached(key)
    }

    fn remove_cached(&self, key: &str) -> StoreResult<()> {
        (**self).remove_cached(key)
    }
}
