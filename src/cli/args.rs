//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the torrent downloader
#[derive(Debug, Parser)]
#[command(name = "torrent-leech")]
#[command(about = "A download-only BitTorrent client", long_about = None)]
pub struct CliArgs {
    /// Path to the .torrent file
    #[arg(value_name = "TORRENT_FILE")]
    pub torrent_file: PathBuf,

    /// Download directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Port reported to trackers
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// Maximum number of concurrent peer workers
    #[arg(short, long, default_value_t = 50)]
    pub max_peers: usize,

    /// Peer dial timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub connect_timeout_ms: u64,

    /// Per-read deadline on peer connections in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub read_timeout_ms: u64,

    /// Upper bound on a single tracker announce in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub tracker_timeout_ms: u64,

    /// Block requests kept in flight per peer
    #[arg(long, default_value_t = 5)]
    pub pipeline_depth: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
