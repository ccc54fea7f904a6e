//! karmasync command-line client
//!
//! Exports record images, plans and runs migrations between database
//! snapshots, and writes and restores backup archives.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use karmasync_core::{DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};

/// karmasync command-line client
#[derive(Parser, Debug)]
#[command(name = "karmasync")]
#[command(version, about = "Dependency-ordered database migration")]
pub struct Args {
    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the record image of a snapshot and write it as JSON
    Export {
        /// Database snapshot to read
        snapshot: PathBuf,
        /// Image file to write
        image: PathBuf,
        /// Records requested per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },

    /// Show the dependency graph and replay schedule of an image
    Plan {
        /// Image file to read
        image: PathBuf,
        /// Records written per request
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Migrate a snapshot into a fresh database and write the result
    Migrate {
        /// Source database snapshot
        source: PathBuf,
        /// Snapshot file to write the migrated database to
        target: PathBuf,
        /// Records requested per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Records written per request
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Run every stage except the writes
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a compressed, checksummed backup archive of a snapshot
    Backup {
        /// Database snapshot to back up
        snapshot: PathBuf,
        /// Archive file to write
        archive: PathBuf,
    },

    /// Restore a backup archive into a snapshot file
    Restore {
        /// Archive file to read
        archive: PathBuf,
        /// Snapshot file to write
        snapshot: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("karmasync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = commands::run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
