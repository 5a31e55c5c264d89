//! Purge-dead-letters command implementation.

use super::CliError;
use offsync_store::{journal_path, FileQueueStore, JournalOptions, QueueStore};
use std::path::Path;
use tracing::info;

/// Deletes every dead letter and returns how many were deleted.
pub fn purge(path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    if !journal_path(path).exists() {
        return Err(CliError::JournalNotFound(journal_path(path)).into());
    }
    let store = FileQueueStore::open_dir(path, JournalOptions::default())?;
    let purged = store.purge_dead_letters()?;
    info!(purged, "dead letters purged");
    Ok(purged)
}

/// Runs the purge-dead-letters command.
pub fn run(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err(CliError::NotConfirmed("purge dead letters").into());
    }
    let purged = purge(path)?;
    println!("Purged {} dead letter(s)", purged);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sample_queue;

    #[test]
    fn requires_confirmation() {
        let dir = sample_queue();
        assert!(run(dir.path(), false).is_err());
        assert_eq!(purge(dir.path()).unwrap(), 1);
        assert_eq!(purge(dir.path()).unwrap(), 0);
    }
}
