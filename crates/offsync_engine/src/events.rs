//! Typed engine events for subscribers.

use offsync_protocol::{DeadLetterReason, ItemId};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Something a subscriber may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The queue drained completely.
    QueueEmptied,
    /// The remote rejected the credentials; delivery is paused until `resume`.
    ReauthRequired {
        /// Item that was being delivered.
        item_id: ItemId,
        /// Message from the remote.
        message: String,
    },
    /// An item left the live queue for the dead-letter set.
    ItemDeadLettered {
        /// The item.
        item_id: ItemId,
        /// Why it was moved.
        reason: DeadLetterReason,
    },
    /// The circuit breaker opened.
    CircuitOpened {
        /// When a probe becomes possible.
        next_probe_at: Instant,
    },
    /// A probe succeeded and the circuit closed.
    CircuitClosed,
    /// A store write failed; affected items are held in memory.
    StorageDegraded {
        /// Error from the store.
        message: String,
    },
}

/// Broadcast channel for engine events.
#[derive(Debug)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}
