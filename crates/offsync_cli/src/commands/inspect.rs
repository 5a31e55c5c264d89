//! Inspect command implementation.

use super::open_journal;
use offsync_store::scan;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Queue directory.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Bytes covered by complete frames.
    pub valid_bytes: u64,
    /// True if the journal ends in an incomplete frame.
    pub torn_tail: bool,
    /// Number of complete frames.
    pub frames: u64,
    /// Frames per record type.
    pub frames_by_type: BTreeMap<String, u64>,
    /// Frames that compaction would drop.
    pub obsolete_records: u64,
    /// Live items.
    pub live_items: usize,
    /// Live items per status.
    pub by_status: BTreeMap<String, usize>,
    /// Live items per mutation kind.
    pub by_kind: BTreeMap<String, usize>,
    /// Highest retry count among live items.
    pub max_retry_count: u32,
    /// Dead letters.
    pub dead_letters: usize,
    /// Cached entries.
    pub cache_entries: usize,
}

/// Collects statistics for the journal in `path`.
pub fn collect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let backend = open_journal(path)?;
    let report = scan(&backend)?;

    let mut by_status = BTreeMap::new();
    let mut by_kind = BTreeMap::new();
    for item in &report.items {
        *by_status.entry(item.status.to_string()).or_insert(0) += 1;
        *by_kind.entry(item.kind.as_str().to_string()).or_insert(0) += 1;
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_bytes: report.total_bytes,
        valid_bytes: report.valid_bytes,
        torn_tail: report.torn_tail,
        frames: report.frames,
        frames_by_type: report
            .frames_by_type
            .iter()
            .map(|(name, count)| ((*name).to_string(), *count))
            .collect(),
        obsolete_records: report.obsolete_records,
        live_items: report.items.len(),
        by_status,
        by_kind,
        max_retry_count: report.items.iter().map(|i| i.retry_count).max().unwrap_or(0),
        dead_letters: report.dead_letters.len(),
        cache_entries: report.cache_keys.len(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Queue: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:             {} bytes", result.journal_bytes);
    println!("  Valid:            {} bytes", result.valid_bytes);
    println!("  Frames:           {}", result.frames);
    println!("  Obsolete frames:  {}", result.obsolete_records);
    if result.torn_tail {
        println!("  Torn tail:        yes (dropped on next open)");
    }
    for (name, count) in &result.frames_by_type {
        println!("    {:<20} {}", name, count);
    }
    println!();
    println!("Queue:");
    println!("  Live items:       {}", result.live_items);
    for (status, count) in &result.by_status {
        println!("    {:<20} {}", status, count);
    }
    for (kind, count) in &result.by_kind {
        println!("    {:<20} {}", kind, count);
    }
    println!("  Max retry count:  {}", result.max_retry_count);
    println!("  Dead letters:     {}", result.dead_letters);
    println!("  Cache entries:    {}", result.cache_entries);
}
