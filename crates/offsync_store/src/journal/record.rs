//! Journal records and their CBOR payloads.

use super::frame::RecordType;
use crate::error::{StoreError, StoreResult};
use offsync_protocol::{DeadLetterItem, ItemId, ItemPatch, QueueItem};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One change to the stored queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// A new live item, or a full replacement of a live item with this id.
    Append(QueueItem),
    /// A partial update of a live item.
    Update {
        /// Item to update.
        id: ItemId,
        /// Fields to change.
        patch: ItemPatch,
    },
    /// A completed item leaving the queue.
    Remove {
        /// Item to remove.
        id: ItemId,
    },
    /// An item moving to the dead-letter set. Removes the live copy, if any.
    DeadLetter(DeadLetterItem),
    /// Every dead letter deleted.
    PurgeDeadLetters,
    /// Cached content stored under a key.
    CachePut {
        /// Cache key.
        key: String,
        /// Cached bytes.
        value: Vec<u8>,
    },
    /// Cached content deleted.
    CacheRemove {
        /// Cache key.
        key: String,
    },
}

#[derive(Serialize, Deserialize)]
struct UpdatePayload {
    id: ItemId,
    patch: ItemPatch,
}

#[derive(Serialize, Deserialize)]
struct RemovePayload {
    id: ItemId,
}

#[derive(Serialize, Deserialize)]
struct CachePutPayload {
    key: String,
    value: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct CacheRemovePayload {
    key: String,
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Append(_) => RecordType::Append,
            Self::Update { .. } => RecordType::Update,
            Self::Remove { .. } => RecordType::Remove,
            Self::DeadLetter(_) => RecordType::DeadLetter,
            Self::PurgeDeadLetters => RecordType::PurgeDeadLetters,
            Self::CachePut { .. } => RecordType::CachePut,
            Self::CacheRemove { .. } => RecordType::CacheRemove,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if CBOR encoding fails.
    pub fn encode_payload(&self) -> StoreResult<Vec<u8>> {
        match self {
            Self::Append(item) => to_cbor(item),
            Self::Update { id, patch } => to_cbor(&UpdatePayload {
                id: *id,
                patch: patch.clone(),
            }),
            Self::Remove { id } => to_cbor(&RemovePayload { id: *id }),
            Self::DeadLetter(dead) => to_cbor(dead),
            Self::PurgeDeadLetters => Ok(Vec::new()),
            Self::CachePut { key, value } => to_cbor(&CachePutPayload {
                key: key.clone(),
                value: value.clone(),
            }),
            Self::CacheRemove { key } => to_cbor(&CacheRemovePayload { key: key.clone() }),
        }
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid for the record type.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> StoreResult<Self> {
        Ok(match record_type {
            RecordType::Append => Self::Append(from_cbor(payload)?),
            RecordType::Update => {
                let UpdatePayload { id, patch } = from_cbor(payload)?;
                Self::Update { id, patch }
            }
            RecordType::Remove => {
                let RemovePayload { id } = from_cbor(payload)?;
                Self::Remove { id }
            }
            RecordType::DeadLetter => Self::DeadLetter(from_cbor(payload)?),
            RecordType::PurgeDeadLetters => {
                if !payload.is_empty() {
                    return Err(StoreError::corrupted(format!(
                        "trailing bytes in purge record: {} bytes",
                        payload.len()
                    )));
                }
                Self::PurgeDeadLetters
            }
            RecordType::CachePut => {
                let CachePutPayload { key, value } = from_cbor(payload)?;
                Self::CachePut { key, value }
            }
            RecordType::CacheRemove => {
                let CacheRemovePayload { key } = from_cbor(payload)?;
                Self::CacheRemove { key }
            }
        })
    }
}

fn to_cbor<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(payload: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(payload).map_err(|e| StoreError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{Action, DeadLetterReason, ItemStatus, MutationKind};

    fn decode(record: &JournalRecord) -> JournalRecord {
        let payload = record.encode_payload().unwrap();
        JournalRecord::decode_payload(record.record_type(), &payload).unwrap()
    }

    #[test]
    fn item_records_survive_encoding() {
        let mut item = QueueItem::new(
            MutationKind::Custom("streak".into()),
            Action::Delete,
            vec![0, 255, 7],
        );
        item.last_error = Some("timeout".into());

        let append = JournalRecord::Append(item.clone());
        assert_eq!(decode(&append), append);

        let update = JournalRecord::Update {
            id: item.id,
            patch: ItemPatch::new()
                .with_status(ItemStatus::Failed)
                .with_retry_count(2)
                .clearing_error(),
        };
        assert_eq!(decode(&update), update);

        let dead = JournalRecord::DeadLetter(DeadLetterItem::new(item, DeadLetterReason::Rejected));
        assert_eq!(decode(&dead), dead);
    }

    #[test]
    fn purge_payload_is_empty() {
        let purge = JournalRecord::PurgeDeadLetters;
        assert!(purge.encode_payload().unwrap().is_empty());
        assert!(JournalRecord::decode_payload(RecordType::PurgeDeadLetters, &[1]).is_err());
    }

    #[test]
    fn garbage_payload_is_codec_error() {
        let result = JournalRecord::decode_payload(RecordType::Append, &[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(StoreError::Codec(_))));
    }
}
