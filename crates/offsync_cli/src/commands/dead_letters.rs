//! Dead-letters command implementation.

use super::open_journal;
use offsync_protocol::DeadLetterItem;
use offsync_store::scan;
use serde::Serialize;
use std::path::Path;

/// One dead letter as printed.
#[derive(Debug, Serialize)]
pub struct DeadLetterRow {
    /// Item id.
    pub id: String,
    /// Mutation kind.
    pub kind: String,
    /// Why the item was dead-lettered.
    pub reason: String,
    /// Failed attempts.
    pub retry_count: u32,
    /// When the item was enqueued, Unix milliseconds.
    pub enqueued_at: u64,
    /// When the item was dead-lettered, Unix milliseconds.
    pub moved_at: u64,
    /// Last failure message.
    pub last_error: Option<String>,
    /// Payload size in bytes.
    pub payload_bytes: usize,
}

impl From<&DeadLetterItem> for DeadLetterRow {
    fn from(dead: &DeadLetterItem) -> Self {
        Self {
            id: dead.id().to_string(),
            kind: dead.original_kind.as_str().to_string(),
            reason: dead.reason.to_string(),
            retry_count: dead.item.retry_count,
            enqueued_at: dead.item.enqueued_at.as_millis(),
            moved_at: dead.moved_at.as_millis(),
            last_error: dead.item.last_error.clone(),
            payload_bytes: dead.item.payload.len(),
        }
    }
}

/// Lists up to `limit` dead letters from the journal in `path`.
pub fn collect(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<DeadLetterRow>, Box<dyn std::error::Error>> {
    let backend = open_journal(path)?;
    let report = scan(&backend)?;
    Ok(report
        .dead_letters
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(DeadLetterRow::from)
        .collect())
}

/// Runs the dead-letters command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = collect(path, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            if rows.is_empty() {
                println!("No dead letters");
            }
            for row in &rows {
                println!(
                    "{}  {:<14} {:<18} retries={} bytes={}",
                    row.id, row.kind, row.reason, row.retry_count, row.payload_bytes
                );
                if let Some(error) = &row.last_error {
                    println!("    last error: {}", error);
                }
            }
        }
    }

    Ok(())
}
