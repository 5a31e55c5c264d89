//! Compact command implementation.

use super::{open_journal, CliError};
use offsync_store::{journal_path, scan, FileQueueStore, JournalOptions};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let report = scan(&open_journal(path)?)?;
    let live_frames = report.frames - report.obsolete_records;
    println!("Compaction Analysis:");
    println!("  Frames:           {}", report.frames);
    println!("  Obsolete frames:  {}", report.obsolete_records);
    println!("  Frames after:     {}", live_frames);
    println!("  Size before:      {} bytes", report.total_bytes);

    if dry_run {
        return Ok(());
    }
    if report.obsolete_records == 0 && !report.torn_tail {
        println!();
        println!("No compaction needed - journal is already minimal");
        return Ok(());
    }

    println!();
    println!("Performing compaction...");
    let compacted = compact(path)?;
    println!("  Size after:       {} bytes", compacted.bytes_after);
    println!("✓ Compaction complete");
    Ok(())
}

/// Compacts the journal in `path`.
pub fn compact(path: &Path) -> Result<offsync_store::CompactionReport, Box<dyn std::error::Error>> {
    if !journal_path(path).exists() {
        return Err(CliError::JournalNotFound(journal_path(path)).into());
    }
    let options = JournalOptions::default().without_auto_compaction();
    let store = FileQueueStore::open_dir(path, options)?;
    Ok(store.compact()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sample_queue;

    #[test]
    fn drops_obsolete_frames() {
        let dir = sample_queue();
        let before = scan(&open_journal(dir.path()).unwrap()).unwrap();
        assert!(before.obsolete_records > 0);

        run(dir.path(), true).unwrap();
        let unchanged = scan(&open_journal(dir.path()).unwrap()).unwrap();
        assert_eq!(unchanged.total_bytes, before.total_bytes);

        let report = compact(dir.path()).unwrap();
        assert!(report.bytes_after < report.bytes_before);

        let after = scan(&open_journal(dir.path()).unwrap()).unwrap();
        assert_eq!(after.obsolete_records, 0);
        assert_eq!(after.items.len(), before.items.len());
        assert_eq!(after.dead_letters.len(), 1);
    }
}
