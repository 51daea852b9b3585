//! CLI configuration module
//!
//! The explicit configuration value handed to trackers, peer sessions and the
//! download coordinator.

use crate::cli::args::CliArgs;
use crate::error::TorrentError;
use crate::protocol::Handshake;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;

/// Configuration for the torrent downloader
#[derive(Debug, Clone)]
pub struct Config {
    /// Download directory
    pub output_dir: PathBuf,
    /// Port reported to trackers
    pub port: u16,
    /// Our peer ID, fixed for the life of the process
    pub peer_id: [u8; 20],
    /// Maximum number of concurrent peer workers
    pub max_peers: usize,
    /// Peer dial timeout
    pub connect_timeout: Duration,
    /// Deadline for each framed read from a peer
    pub read_timeout: Duration,
    /// Upper bound on one tracker announce
    pub tracker_timeout: Duration,
    /// Block requests kept in flight per peer
    pub pipeline_depth: usize,
    /// Consecutive failed piece attempts before a peer is dropped
    pub max_peer_failures: u32,
    /// Pause after handing back a piece the peer does not have
    pub unavailable_backoff: Duration,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            port: 6881,
            peer_id: Handshake::generate_peer_id(),
            max_peers: 50,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(2),
            tracker_timeout: Duration::from_secs(5),
            pipeline_depth: 5,
            max_peer_failures: 5,
            unavailable_backoff: Duration::from_millis(10),
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        let output_dir = args.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            output_dir,
            port: args.port,
            max_peers: args.max_peers,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            tracker_timeout: Duration::from_millis(args.tracker_timeout_ms),
            pipeline_depth: args.pipeline_depth,
            verbose: args.verbose,
            quiet: args.quiet,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TorrentError::config_error_with_field("Port cannot be 0", "port").into());
        }

        if self.max_peers == 0 {
            return Err(TorrentError::config_error_with_field("must be at least 1", "max_peers").into());
        }

        if self.pipeline_depth == 0 {
            return Err(TorrentError::config_error_with_field("must be at least 1", "pipeline_depth").into());
        }

        if self.max_peer_failures == 0 {
            return Err(TorrentError::config_error_with_field("must be at least 1", "max_peer_failures").into());
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("tracker_timeout", self.tracker_timeout),
        ] {
            if value.is_zero() {
                return Err(TorrentError::config_error_with_field("timeout cannot be zero", field).into());
            }
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field("cannot be empty", "output_dir").into());
        }

        Ok(())
    }
}
