//! Journal framing: envelope, checksum and a reader over a backend.

use crate::error::{StoreError, StoreResult};
use offsync_storage::StorageBackend;

/// Magic bytes opening every journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"OSQJ";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Type of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// A new live item.
    Append = 1,
    /// A partial update of a live item.
    Update = 2,
    /// A completed item leaving the queue.
    Remove = 3,
    /// An item moving to the dead-letter set.
    DeadLetter = 4,
    /// Operator purge of the dead-letter set.
    PurgeDeadLetters = 5,
    /// Cached content stored under a key.
    CachePut = 6,
    /// Cached content removed.
    CacheRemove = 7,
}

impl RecordType {
    /// Every record type, in byte order.
    pub const ALL: [RecordType; 7] = [
        RecordType::Append,
        RecordType::Update,
        RecordType::Remove,
        RecordType::DeadLetter,
        RecordType::PurgeDeadLetters,
        RecordType::CachePut,
        RecordType::CacheRemove,
    ];

    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_byte() == b)
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns a stable name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RecordType::Append => "append",
            RecordType::Update => "update",
            RecordType::Remove => "remove",
            RecordType::DeadLetter => "dead_letter",
            RecordType::PurgeDeadLetters => "purge_dead_letters",
            RecordType::CachePut => "cache_put",
            RecordType::CacheRemove => "cache_remove",
        }
    }
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Wraps a payload in a frame.
///
/// # Errors
///
/// Returns an error if the payload does not fit the 4-byte length field.
pub fn encode_frame(record_type: RecordType, payload: &[u8]) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Codec(format!("record payload too large: {} bytes", payload.len())))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&JOURNAL_MAGIC);
    data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    data.push(record_type.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// A complete, checksummed frame read from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame in the journal.
    pub offset: u64,
    /// Record type.
    pub record_type: RecordType,
    /// Undecoded payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Total encoded length of the frame.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        (HEADER_SIZE + self.payload.len() + CRC_SIZE) as u64
    }
}

/// Reads frames one by one from the start of a backend.
///
/// An incomplete header or payload at the end of the journal is a torn
/// write: the reader stops there and reports it through
/// [`FrameReader::torn_tail`]. Bad magic, an unknown version or type and a
/// checksum mismatch are corruption errors.
pub struct FrameReader<'a, B: StorageBackend + ?Sized> {
    backend: &'a B,
    size: u64,
    offset: u64,
    torn_tail: bool,
    finished: bool,
}

impl<'a, B: StorageBackend + ?Sized> FrameReader<'a, B> {
    /// Creates a reader positioned at the start of the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn new(backend: &'a B) -> StoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            backend,
            size,
            offset: 0,
            torn_tail: false,
            finished: false,
        })
    }

    /// Offset just past the last complete frame read so far.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Total size of the journal.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.size
    }

    /// Returns true once the reader has stopped at an incomplete frame.
    #[must_use]
    pub fn torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Reads the next frame, or `None` at the end of the journal.
    ///
    /// # Errors
    ///
    /// Returns an error on corruption or if the backend cannot be read.
    pub fn next_frame(&mut self) -> StoreResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.size - start;
        if remaining == 0 {
            self.finished = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return Ok(self.stop_torn());
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != JOURNAL_MAGIC {
            self.finished = true;
            return Err(StoreError::corrupted(format!("invalid magic at offset {start}")));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version == 0 || version > JOURNAL_VERSION {
            self.finished = true;
            return Err(StoreError::corrupted(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let Some(record_type) = RecordType::from_byte(type_byte) else {
            self.finished = true;
            return Err(StoreError::corrupted(format!(
                "unknown record type {type_byte} at offset {start}"
            )));
        };

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;
        let total_len = HEADER_SIZE as u64 + payload_len + CRC_SIZE as u64;
        if remaining < total_len {
            return Ok(self.stop_torn());
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len as usize + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len as usize);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let actual = compute_crc32(&covered);
        if actual != expected {
            self.finished = true;
            return Err(StoreError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        self.offset = start + total_len;
        Ok(Some(Frame {
            offset: start,
            record_type,
            payload: payload.to_vec(),
        }))
    }

    fn stop_torn(&mut self) -> Option<Frame> {
        self.torn_tail = true;
        self.finished = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_storage::InMemoryBackend;

    fn backend_with(frames: &[Vec<u8>]) -> InMemoryBackend {
        InMemoryBackend::with_data(frames.concat())
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn record_type_bytes() {
        for t in RecordType::ALL {
            assert_eq!(RecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(RecordType::from_byte(0), None);
        assert_eq!(RecordType::from_byte(99), None);
    }

    #[test]
    fn reads_frames_in_order() {
        let a = encode_frame(RecordType::Append, b"first").unwrap();
        let b = encode_frame(RecordType::Remove, b"").unwrap();
        let backend = backend_with(&[a.clone(), b]);

        let mut reader = FrameReader::new(&backend).unwrap();
        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!(first.record_type, RecordType::Append);
        assert_eq!(first.payload, b"first");
        assert_eq!(first.encoded_len(), a.len() as u64);

        let second = reader.next_frame().unwrap().unwrap();
        assert_eq!(second.offset, a.len() as u64);
        assert!(second.payload.is_empty());

        assert!(reader.next_frame().unwrap().is_none());
        assert!(!reader.torn_tail());
        assert_eq!(reader.valid_len(), backend.size().unwrap());
    }

    #[test]
    fn torn_header_and_payload_end_the_journal() {
        let complete = encode_frame(RecordType::Append, b"kept").unwrap();
        let partial = encode_frame(RecordType::Append, b"lost in a crash").unwrap();

        for cut in [3, HEADER_SIZE + 2, partial.len() - 1] {
            let backend = backend_with(&[complete.clone(), partial[..cut].to_vec()]);
            let mut reader = FrameReader::new(&backend).unwrap();
            assert!(reader.next_frame().unwrap().is_some());
            assert!(reader.next_frame().unwrap().is_none());
            assert!(reader.torn_tail());
            assert_eq!(reader.valid_len(), complete.len() as u64);
        }
    }

    #[test]
    fn flipped_payload_bit_is_checksum_error() {
        let mut frame = encode_frame(RecordType::CachePut, b"payload").unwrap();
        frame[HEADER_SIZE + 2] ^= 0x01;
        let backend = backend_with(&[frame]);

        let mut reader = FrameReader::new(&backend).unwrap();
        assert!(matches!(
            reader.next_frame(),
            Err(StoreError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn bad_magic_and_version_are_corruption() {
        let mut frame = encode_frame(RecordType::Append, b"x").unwrap();
        frame[0] = b'X';
        let backend = backend_with(&[frame]);
        let mut reader = FrameReader::new(&backend).unwrap();
        assert!(matches!(reader.next_frame(), Err(StoreError::Corrupted { .. })));

        let mut frame = encode_frame(RecordType::Append, b"x").unwrap();
        frame[4] = 9;
        let backend = backend_with(&[frame]);
        let mut reader = FrameReader::new(&backend).unwrap();
        assert!(matches!(reader.next_frame(), Err(StoreError::Corrupted { .. })));
    }
}
