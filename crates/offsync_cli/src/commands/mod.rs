//! CLI command implementations.

pub mod compact;
pub mod dead_letters;
pub mod inspect;
pub mod purge;
pub mod verify;

use offsync_storage::FileBackend;
use offsync_store::journal_path;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// No journal exists in the queue directory.
    #[error("no queue journal found at {0:?}")]
    JournalNotFound(PathBuf),

    /// A destructive command was run without confirmation.
    #[error("refusing to {0} without --yes")]
    NotConfirmed(&'static str),

    /// Verification found problems.
    #[error("journal verification failed with {0} error(s)")]
    VerificationFailed(usize),
}

/// Opens the journal of a queue directory without creating it.
pub fn open_journal(dir: &Path) -> Result<FileBackend, Box<dyn std::error::Error>> {
    let path = journal_path(dir);
    if !path.exists() {
        return Err(CliError::JournalNotFound(path).into());
    }
    tracing::debug!(path = ?path, "opening journal");
    Ok(FileBackend::open(&path)?)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_journal_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_journal(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no queue journal"));
        assert!(!journal_path(dir.path()).exists());
    }
}
