//! Last-write-wins conflict resolution.
//!
//! Given a local and a remote version of the same logical record, the
//! resolver picks the version with the later modification time. A strictly
//! newer remote version wins; ties keep the local version, so resolving the
//! same pair twice always gives the same answer.
//!
//! The number of differing fields is reported for telemetry only. It never
//! influences which version wins. Field-level merging is intentionally not
//! offered: an older local edit may be dropped in favour of a newer remote one.

use crate::time::Timestamp;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A record carrying a comparable last-modified time.
pub trait Versioned {
    /// When this version was last modified.
    fn last_modified(&self) -> Timestamp;
}

/// A record with a stable identity, used to pair versions in a batch.
pub trait Keyed {
    /// The identity type.
    type Key: Ord + Clone + Debug;

    /// Returns the identity of this record.
    fn key(&self) -> Self::Key;
}

/// Which side won a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winner {
    /// The local version was kept.
    Local,
    /// The remote version was accepted.
    Remote,
}

/// Strategy used to resolve a conflict. Only last-write-wins is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolutionStrategy {
    /// The later modification time wins, ties favour local.
    #[default]
    LastWriteWins,
}

/// Outcome of resolving two versions of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution<T> {
    /// The winning version.
    pub resolved: T,
    /// Which side won.
    pub winner: Winner,
    /// Number of leaf fields that differ between the two versions.
    pub conflict_count: usize,
    /// Strategy used.
    pub strategy: ResolutionStrategy,
    /// When the resolution was made.
    pub resolved_at: Timestamp,
}

impl<T> ConflictResolution<T> {
    /// Returns true if the two versions differed at all.
    pub fn had_conflict(&self) -> bool {
        self.conflict_count > 0
    }
}

/// Resolves two versions of a record, stamping the result with the current time.
///
/// Everything but `resolved_at` depends only on the inputs. Use
/// [`resolve_at`] when the whole result must be reproducible.
pub fn resolve<T>(local: T, remote: T) -> ConflictResolution<T>
where
    T: Versioned + Serialize,
{
    resolve_at(local, remote, Timestamp::now())
}

/// Resolves two versions of a record with an explicit resolution time.
///
/// This is a pure function: the same inputs always give an identical output.
pub fn resolve_at<T>(local: T, remote: T, resolved_at: Timestamp) -> ConflictResolution<T>
where
    T: Versioned + Serialize,
{
    let conflict_count = count_differences(&local, &remote);
    let (resolved, winner) = if remote.last_modified() > local.last_modified() {
        (remote, Winner::Remote)
    } else {
        (local, Winner::Local)
    };

    ConflictResolution {
        resolved,
        winner,
        conflict_count,
        strategy: ResolutionStrategy::LastWriteWins,
        resolved_at,
    }
}

/// Summary of one paired record in a batch resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry<K> {
    /// Identity of the record.
    pub key: K,
    /// Which side won.
    pub winner: Winner,
    /// Number of differing leaf fields.
    pub conflict_count: usize,
}

/// Outcome of resolving two collections of records.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResolution<T: Keyed> {
    /// The union of both sides with paired records resolved.
    pub items: Vec<T>,
    /// One entry per record present on both sides.
    pub resolved: Vec<BatchEntry<T::Key>>,
    /// Number of records present only locally.
    pub local_only: usize,
    /// Number of records present only remotely.
    pub remote_only: usize,
    /// When the resolution was made.
    pub resolved_at: Timestamp,
}

impl<T: Keyed> BatchResolution<T> {
    /// Total differing fields across all paired records.
    pub fn total_conflicts(&self) -> usize {
        self.resolved.iter().map(|e| e.conflict_count).sum()
    }

    /// Number of paired records that the remote side won.
    pub fn remote_wins(&self) -> usize {
        self.resolved
            .iter()
            .filter(|e| e.winner == Winner::Remote)
            .count()
    }
}

/// Resolves two collections, pairing records by key, at the current time.
///
/// Only `resolved_at` varies between calls with the same inputs; see
/// [`resolve_batch_at`].
pub fn resolve_batch<T>(local: Vec<T>, remote: Vec<T>) -> BatchResolution<T>
where
    T: Versioned + Keyed + Serialize,
{
    resolve_batch_at(local, remote, Timestamp::now())
}

/// Resolves two collections with an explicit resolution time.
///
/// The output holds local records in their original order (paired ones
/// replaced by the winner), followed by remote-only records in remote order.
/// If a key appears more than once on the remote side, the last occurrence
/// is the one paired.
pub fn resolve_batch_at<T>(local: Vec<T>, remote: Vec<T>, resolved_at: Timestamp) -> BatchResolution<T>
where
    T: Versioned + Keyed + Serialize,
{
    let mut remote_index: BTreeMap<T::Key, usize> = BTreeMap::new();
    for (position, record) in remote.iter().enumerate() {
        remote_index.insert(record.key(), position);
    }
    let mut remote_slots: Vec<Option<T>> = remote.into_iter().map(Some).collect();

    let mut items = Vec::with_capacity(local.len() + remote_slots.len());
    let mut resolved = Vec::new();
    let mut local_only = 0;

    for record in local {
        let key = record.key();
        let counterpart = remote_index
            .remove(&key)
            .and_then(|position| remote_slots[position].take());

        match counterpart {
            Some(remote_record) => {
                let resolution = resolve_at(record, remote_record, resolved_at);
                resolved.push(BatchEntry {
                    key,
                    winner: resolution.winner,
                    conflict_count: resolution.conflict_count,
                });
                items.push(resolution.resolved);
            }
            None => {
                local_only += 1;
                items.push(record);
            }
        }
    }

    let mut remote_only = 0;
    for (position, slot) in remote_slots.into_iter().enumerate() {
        if let Some(record) = slot {
            // Earlier duplicates of a paired key were shadowed by the last occurrence.
            if remote_index.get(&record.key()) == Some(&position) {
                remote_only += 1;
                items.push(record);
            }
        }
    }

    BatchResolution {
        items,
        resolved,
        local_only,
        remote_only,
        resolved_at,
    }
}

fn count_differences<T: Serialize>(a: &T, b: &T) -> usize {
    let a = serde_json::to_value(a).unwrap_or(Value::Null);
    let b = serde_json::to_value(b).unwrap_or(Value::Null);
    diff_values(&a, &b)
}

fn diff_values(a: &Value, b: &Value) -> usize {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            let mut count = 0;
            for (key, left_value) in left {
                count += match right.get(key) {
                    Some(right_value) => diff_values(left_value, right_value),
                    None => 1,
                };
            }
            count += right.keys().filter(|key| !left.contains_key(*key)).count();
            count
        }
        (Value::Array(left), Value::Array(right)) => {
            let paired: usize = left
                .iter()
                .zip(right.iter())
                .map(|(l, r)| diff_values(l, r))
                .sum();
            paired + left.len().abs_diff(right.len())
        }
        _ => usize::from(a != b),
    }
}
