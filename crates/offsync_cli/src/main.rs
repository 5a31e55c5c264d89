//! offsync CLI
//!
//! Command-line tools for offsync queue directories.
//!
//! # Commands
//!
//! - `inspect` - Display journal statistics and queue contents
//! - `dead-letters` - List dead-lettered items
//! - `purge-dead-letters` - Delete every dead letter
//! - `compact` - Rewrite the journal as a snapshot
//! - `verify` - Verify journal integrity

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync command-line queue tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display journal statistics and queue contents
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List dead-lettered items
    DeadLetters {
        /// Maximum number of items to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete every dead letter
    PurgeDeadLetters {
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },

    /// Rewrite the journal as a snapshot
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Verify journal integrity
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Queue path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::DeadLetters { limit, format } => {
            let path = cli.path.ok_or("Queue path required for dead-letters")?;
            commands::dead_letters::run(&path, limit, &format)?;
        }
        Commands::PurgeDeadLetters { yes } => {
            let path = cli.path.ok_or("Queue path required for purge-dead-letters")?;
            commands::purge::run(&path, yes)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Queue path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Queue path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Journal format v{}", offsync_store::journal::JOURNAL_VERSION);
        }
    }

    Ok(())
}
