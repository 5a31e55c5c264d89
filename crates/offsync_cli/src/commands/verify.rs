//! Verify command implementation.

use super::{open_journal, CliError};
use offsync_storage::StorageBackend;
use offsync_store::journal::{FrameReader, JournalRecord};
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of frames checked.
    pub frames_checked: usize,
    /// Number of frames that decoded cleanly.
    pub valid_frames: usize,
    /// True if the journal ends in an incomplete frame.
    pub torn_tail: bool,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            frames_checked: 0,
            valid_frames: 0,
            torn_tail: false,
            errors: Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walks every frame, checking framing, checksums and payload decoding.
///
/// Corruption in a frame stops the walk: frame boundaries after it cannot
/// be trusted.
pub fn verify<B: StorageBackend + ?Sized>(
    backend: &B,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::new();
    let mut reader = FrameReader::new(backend)?;

    loop {
        match reader.next_frame() {
            Ok(Some(frame)) => {
                result.frames_checked += 1;
                match JournalRecord::decode_payload(frame.record_type, &frame.payload) {
                    Ok(_) => result.valid_frames += 1,
                    Err(err) => result.errors.push(format!(
                        "undecodable {} payload at offset {}: {}",
                        frame.record_type.name(),
                        frame.offset,
                        err
                    )),
                }
            }
            Ok(None) => break,
            Err(err) => {
                result.frames_checked += 1;
                result.errors.push(err.to_string());
                break;
            }
        }
    }
    result.torn_tail = reader.torn_tail();
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying journal at {:?}", path);
    println!();

    let backend = open_journal(path)?;
    let result = verify(&backend)?;

    println!("  Frames checked: {}", result.frames_checked);
    println!("  Valid:          {}", result.valid_frames);
    if result.torn_tail {
        println!("  Torn tail:      yes (dropped on next open)");
    }
    for error in &result.errors {
        println!("    - {}", error);
    }
    println!();

    if result.is_ok() {
        println!("✓ Journal is valid");
        Ok(())
    } else {
        println!("✗ Journal has errors");
        Err(CliError::VerificationFailed(result.errors.len()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sample_queue;
    use offsync_storage::InMemoryBackend;

    #[test]
    fn clean_journal_verifies() {
        let dir = sample_queue();
        let backend = open_journal(dir.path()).unwrap();
        let result = verify(&backend).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.frames_checked, 6);
        assert_eq!(result.valid_frames, 6);
    }

    #[test]
    fn reports_checksum_damage() {
        let dir = sample_queue();
        let backend = open_journal(dir.path()).unwrap();
        let size = backend.size().unwrap() as usize;
        let mut bytes = backend.read_at(0, size).unwrap();
        bytes[20] ^= 0xFF;

        let result = verify(&InMemoryBackend::with_data(bytes)).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.valid_frames, 0);
    }

    #[test]
    fn torn_tail_is_not_an_error() {
        let dir = sample_queue();
        let backend = open_journal(dir.path()).unwrap();
        let size = backend.size().unwrap() as usize;
        let bytes = backend.read_at(0, size - 2).unwrap();

        let result = verify(&InMemoryBackend::with_data(bytes)).unwrap();
        assert!(result.is_ok());
        assert!(result.torn_tail);
        assert_eq!(result.valid_frames, 5);
    }
}
