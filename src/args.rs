//! Command-line argument definitions for the `segfetch` binary.
use crate::state::SessionId;
use clap::{Parser, Subcommand};

/// Accelerated downloads over concurrent byte-range chunks.
///
/// Splits a file into ranges, fetches them in parallel and stitches them
/// back together, with pause, resume and automatic retries.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a single URL in the foreground.
    Run {
        /// The URL of the file to download.
        #[arg(short, long)]
        url: String,

        /// The number of concurrent chunks to fetch.
        #[arg(short = 't', long)]
        threads: Option<u8>,

        /// The directory to save the file in.
        #[arg(short = 'd', long)]
        dir: Option<String>,

        /// A rate limit in bytes per second (e.g., 1048576 for 1MB/s).
        #[arg(long)]
        rate_limit: Option<u32>,
    },
    /// Start the background daemon
    Start,
    /// Add a download to the running daemon
    Add {
        /// URL to download
        #[arg(short, long)]
        url: String,
        #[arg(short = 't', long)]
        threads: Option<u8>,
    },
    /// Pause a download
    Pause { id: SessionId },
    /// Resume a paused download
    Resume { id: SessionId },
    /// Cancel a download and discard its data
    Cancel { id: SessionId },
    /// List downloads
    List,
    /// Open a finished download
    Open { id: SessionId },
    /// Print events from the daemon as they happen
    Watch,
    /// Stop the daemon
    Stop,
}
