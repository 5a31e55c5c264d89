//! # offsync Protocol
//!
//! Queue item model and conflict resolution for offsync.
//!
//! This crate provides:
//! - [`QueueItem`] for pending mutations and [`ItemPatch`] for partial updates
//! - [`DeadLetterItem`] for items that need operator attention
//! - [`conflict`] with the last-write-wins resolver
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conflict;
mod item;
mod time;

pub use conflict::{
    resolve, resolve_at, resolve_batch, resolve_batch_at, BatchEntry, BatchResolution,
    ConflictResolution, Keyed, ResolutionStrategy, Versioned, Winner,
};
pub use item::{
    Action, DeadLetterItem, DeadLetterReason, ItemId, ItemPatch, ItemStatus, MutationKind,
    ParseItemIdError, QueueItem,
};
pub use time::Timestamp;
