//! torrent-leech
//!
//! A download-only BitTorrent client: UDP and HTTP trackers, the peer wire
//! protocol, and a work-queue coordinator that spreads pieces across peers.

pub mod torrent;
pub mod protocol;
pub mod tracker;
pub mod peer;
pub mod storage;
pub mod download;
pub mod cli;
pub mod error;

pub use error::TorrentError;

pub use torrent::{TorrentParser, TorrentInfo, TorrentFile};
pub use protocol::{Bitfield, Handshake, Message, MessageId};
pub use tracker::{AnnounceRequest, AnnounceResponse, TrackerAggregator, TrackerClient, TrackerState};
pub use peer::{PeerSession, PeerState};
pub use storage::{FileStorage, Piece, Block, StorageBackend};
pub use download::{DownloadCoordinator, DownloadProgress, DownloadStatus, WorkQueue};
pub use cli::{CliArgs, Config, ProgressDisplay};
