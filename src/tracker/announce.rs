//! Announce request/response types shared by every tracker transport

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::cli::Config;
use crate::torrent::TorrentInfo;

/// Size of one compact IPv4 peer record
pub const COMPACT_PEER_LENGTH: usize = 6;

/// Lifecycle of a single tracker client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerState {
    #[default]
    Idle,
    /// Resolving the host / performing the UDP connect exchange
    Connecting,
    /// Connection id obtained (UDP) or client built (HTTP)
    Connected,
    Announcing,
    Done,
    Failed,
}

impl TrackerState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TrackerState::Done | TrackerState::Failed)
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerState::Idle => "idle",
            TrackerState::Connecting => "connecting",
            TrackerState::Connected => "connected",
            TrackerState::Announcing => "announcing",
            TrackerState::Done => "done",
            TrackerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Parameters of an announce. Nothing is ever uploaded or reported downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    /// Bytes still needed
    pub left: u64,
}

impl AnnounceRequest {
    pub fn new(torrent: &TorrentInfo, config: &Config) -> Self {
        Self {
            info_hash: torrent.info_hash,
            peer_id: config.peer_id,
            port: config.port,
            left: torrent.total_size(),
        }
    }
}

/// Peers returned by one tracker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds the tracker asks us to wait before re-announcing
    pub interval: u32,
    pub peers: Vec<SocketAddr>,
}

/// Parse packed 6-byte peer records (4-byte IPv4 + 2-byte port, big-endian).
/// A trailing partial record is ignored.
pub fn parse_compact_peers(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(COMPACT_PEER_LENGTH)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
