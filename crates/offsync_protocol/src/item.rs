//! Queue items and their lifecycle.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier of a queue item, stable across persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes of the identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Error returned when an item id cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid item id: {0}")]
pub struct ParseItemIdError(String);

impl FromStr for ItemId {
    type Err = ParseItemIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseItemIdError(s.to_string()))
    }
}

/// Category of a mutation. Each kind maps to one remote operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Study session updates.
    Session,
    /// Answer submissions.
    Answer,
    /// Aggregated statistics.
    Statistics,
    /// Progress deltas.
    Progress,
    /// Pin and unpin operations.
    PinOperation,
    /// An application-defined kind.
    Custom(String),
}

impl MutationKind {
    /// Returns a stable name for logs and metrics.
    pub fn as_str(&self) -> &str {
        match self {
            MutationKind::Session => "session",
            MutationKind::Answer => "answer",
            MutationKind::Statistics => "statistics",
            MutationKind::Progress => "progress",
            MutationKind::PinOperation => "pin_operation",
            MutationKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the mutation does to the remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new record.
    Create,
    /// Update an existing record.
    Update,
    /// Delete a record.
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// Stored status of a queue item.
///
/// Completion is terminal and removes the item, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for delivery.
    Pending,
    /// A delivery attempt is running.
    InFlight,
    /// The last attempt failed; the item waits for a retry.
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in_flight",
            ItemStatus::Failed => "failed",
        })
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier.
    pub id: ItemId,
    /// Mutation category.
    pub kind: MutationKind,
    /// Create, update or delete.
    pub action: Action,
    /// Opaque payload, never inspected by the engine.
    pub payload: Vec<u8>,
    /// When the item was enqueued.
    pub enqueued_at: Timestamp,
    /// When the last delivery attempt started.
    pub last_attempt_at: Option<Timestamp>,
    /// Number of failed attempts.
    pub retry_count: u32,
    /// Current status.
    pub status: ItemStatus,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Creates a new pending item stamped with the current time.
    pub fn new(kind: MutationKind, action: Action, payload: Vec<u8>) -> Self {
        Self {
            id: ItemId::new(),
            kind,
            action,
            payload,
            enqueued_at: Timestamp::now(),
            last_attempt_at: None,
            retry_count: 0,
            status: ItemStatus::Pending,
            last_error: None,
        }
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(at) = patch.last_attempt_at {
            self.last_attempt_at = Some(at);
        }
        if patch.clear_error {
            self.last_error = None;
        }
        if let Some(error) = &patch.last_error {
            self.last_error = Some(error.clone());
        }
    }
}

/// A partial update to a stored item.
///
/// Unset fields are left untouched. Clearing the error is explicit through
/// [`ItemPatch::clear_error`], so "absent" and "erase" never get confused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    /// New status.
    pub status: Option<ItemStatus>,
    /// New retry count.
    pub retry_count: Option<u32>,
    /// New last-attempt time.
    pub last_attempt_at: Option<Timestamp>,
    /// New error message.
    pub last_error: Option<String>,
    /// Erase the stored error message before applying `last_error`.
    pub clear_error: bool,
}

impl ItemPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status.
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Sets the last attempt time.
    pub fn with_last_attempt_at(mut self, at: Timestamp) -> Self {
        self.last_attempt_at = Some(at);
        self
    }

    /// Sets the error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Erases the error message.
    pub fn clearing_error(mut self) -> Self {
        self.clear_error = true;
        self.last_error = None;
        self
    }

    /// Builds the patch that brings a stored copy in line with `item`.
    pub fn snapshot_of(item: &QueueItem) -> Self {
        Self {
            status: Some(item.status),
            retry_count: Some(item.retry_count),
            last_attempt_at: item.last_attempt_at,
            last_error: item.last_error.clone(),
            clear_error: item.last_error.is_none(),
        }
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.retry_count.is_none()
            && self.last_attempt_at.is_none()
            && self.last_error.is_none()
            && !self.clear_error
    }
}

/// Why an item left the live queue for the dead-letter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The retry budget ran out.
    ExhaustedRetries,
    /// The remote rejected the payload as invalid.
    Rejected,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeadLetterReason::ExhaustedRetries => "exhausted_retries",
            DeadLetterReason::Rejected => "rejected",
        })
    }
}

/// An item that needs operator attention. Written once, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    /// The item as it was when it was moved.
    pub item: QueueItem,
    /// The item's original kind.
    pub original_kind: MutationKind,
    /// When the item was moved.
    pub moved_at: Timestamp,
    /// Why the item was moved.
    pub reason: DeadLetterReason,
}

impl DeadLetterItem {
    /// Wraps an item that is leaving the live queue now.
    pub fn new(item: QueueItem, reason: DeadLetterReason) -> Self {
        Self {
            original_kind: item.kind.clone(),
            item,
            moved_at: Timestamp::now(),
            reason,
        }
    }

    /// Returns the id of the wrapped item.
    pub fn id(&self) -> ItemId {
        self.item.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_pending() {
        let item = QueueItem::new(MutationKind::Answer, Action::Create, vec![1, 2]);
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.last_attempt_at.is_none());
        assert!(item.last_error.is_none());
    }

    #[test]
    fn ids_are_unique_and_parse_back() {
        let a = ItemId::new();
        let b = ItemId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<ItemId>().unwrap(), a);
        assert!("not-an-id".parse::<ItemId>().is_err());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut item = QueueItem::new(MutationKind::Progress, Action::Update, vec![]);
        item.apply(
            &ItemPatch::new()
                .with_status(ItemStatus::Failed)
                .with_retry_count(1)
                .with_error("server error: 503"),
        );
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("server error: 503"));

        item.apply(&ItemPatch::new().with_status(ItemStatus::Pending));
        assert_eq!(item.retry_count, 1);
        assert!(item.last_error.is_some());

        item.apply(&ItemPatch::new().clearing_error().with_retry_count(0));
        assert!(item.last_error.is_none());
        assert_eq!(item.retry_count, 0);
    }

    #[test]
    fn snapshot_patch_reproduces_item() {
        let mut stored = QueueItem::new(MutationKind::Session, Action::Update, vec![9]);
        stored.last_error = Some("stale".into());

        let mut current = stored.clone();
        current.status = ItemStatus::Failed;
        current.retry_count = 2;
        current.last_error = None;
        current.last_attempt_at = Some(Timestamp::from_millis(42));

        stored.apply(&ItemPatch::snapshot_of(&current));
        assert_eq!(stored, current);
    }

    #[test]
    fn empty_patch() {
        assert!(ItemPatch::new().is_empty());
        assert!(!ItemPatch::new().clearing_error().is_empty());
    }

    #[test]
    fn kind_names() {
        assert_eq!(MutationKind::PinOperation.as_str(), "pin_operation");
        assert_eq!(MutationKind::Custom("xp".into()).to_string(), "xp");
    }

    #[test]
    fn dead_letter_keeps_original_kind() {
        let item = QueueItem::new(MutationKind::Statistics, Action::Create, vec![]);
        let id = item.id;
        let dead = DeadLetterItem::new(item, DeadLetterReason::ExhaustedRetries);
        assert_eq!(dead.id(), id);
        assert_eq!(dead.original_kind, MutationKind::Statistics);
    }
}
