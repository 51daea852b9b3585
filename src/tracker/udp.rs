//! UDP tracker protocol
//!
//! Two round trips: a 16-byte connect exchange that yields a connection id,
//! then a 98-byte announce whose reply carries compact peer records.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::TorrentError;
use super::announce::{parse_compact_peers, AnnounceRequest, AnnounceResponse, TrackerState};

pub const PROTOCOL_ID: u64 = 0x41727101980;
pub const ACTION_CONNECT: u32 = 0;
pub const ACTION_ANNOUNCE: u32 = 1;
pub const ACTION_ERROR: u32 = 3;

/// Constant key sent with every announce
const ANNOUNCE_KEY: u32 = 53;
const EVENT_NONE: u32 = 0;
const ANNOUNCE_HEADER_LENGTH: usize = 20;
const CONNECT_RESPONSE_LENGTH: usize = 16;
/// Every reply starts with an action and a transaction id
const REPLY_HEADER_LENGTH: usize = 8;
/// Largest UDP payload; announce replies grow with the peer count
const MAX_DATAGRAM: usize = 65_536;

/// Client for a single `udp://host:port` announce URL
#[derive(Debug)]
pub struct UdpTracker {
    url: String,
    host: String,
    port: u16,
    timeout: Duration,
    state: TrackerState,
}

impl UdpTracker {
    pub fn new(url: &url::Url, timeout: Duration) -> Result<Self> {
        let host = url.host_str()
            .ok_or_else(|| TorrentError::tracker_error("Missing host", url.as_str()))?
            .to_string();
        let port = url.port()
            .ok_or_else(|| TorrentError::tracker_error("Missing port", url.as_str()))?;

        Ok(Self {
            url: url.to_string(),
            host,
            port,
            timeout,
            state: TrackerState::Idle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Run the connect + announce exchange
    pub async fn announce(&mut self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        let result = self.run(request).await;
        self.state = if result.is_ok() { TrackerState::Done } else { TrackerState::Failed };
        result
    }

    async fn run(&mut self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        self.state = TrackerState::Connecting;
        debug!("UDP tracker {} -> {}", self.url, self.state);

        let addr = self.resolve().await?;
        let socket = UdpSocket::bind(local_bind_addr(&addr)).await
            .map_err(|e| TorrentError::tracker_error_full("Failed to bind UDP socket", &self.url, e.to_string()))?;
        socket.connect(addr).await
            .map_err(|e| TorrentError::tracker_error_full("Failed to connect UDP socket", &self.url, e.to_string()))?;

        let transaction_id: u32 = rand::random();
        let response = self.exchange(&socket, &build_connect_packet(transaction_id), REPLY_HEADER_LENGTH).await?;
        let connection_id = parse_connect_response(&response, transaction_id)
            .map_err(|e| TorrentError::tracker_error_full("Bad connect response", &self.url, e))?;

        self.state = TrackerState::Connected;
        debug!("UDP tracker {} -> {} (connection id {:#x})", self.url, self.state, connection_id);

        self.state = TrackerState::Announcing;
        let transaction_id: u32 = rand::random();
        let packet = build_announce_packet(connection_id, transaction_id, request);
        let response = self.exchange(&socket, &packet, REPLY_HEADER_LENGTH).await?;
        let announce = parse_announce_response(&response, transaction_id)
            .map_err(|e| TorrentError::tracker_error_full("Bad announce response", &self.url, e))?;

        info!("UDP tracker {} returned {} peers", self.url, announce.peers.len());
        Ok(announce)
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let addrs = lookup_host((self.host.as_str(), self.port)).await
            .map_err(|e| TorrentError::tracker_error_full("Failed to resolve host", &self.url, e.to_string()))?;
        prefer_ipv4(addrs)
            .ok_or_else(|| TorrentError::tracker_error("Host resolved to no addresses", &self.url).into())
    }

    async fn exchange(&self, socket: &UdpSocket, packet: &[u8], min_len: usize) -> Result<Vec<u8>> {
        socket.send(packet).await
            .map_err(|e| TorrentError::tracker_error_full("Failed to send", &self.url, e.to_string()))?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = match timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                return Err(TorrentError::tracker_error_full("Failed to receive", &self.url, e.to_string()).into());
            }
            Err(_) => {
                warn!("UDP tracker {} did not answer within {:?}", self.url, self.timeout);
                return Err(TorrentError::tracker_error("Timed out", &self.url).into());
            }
        };

        if n < min_len {
            return Err(TorrentError::tracker_error_full(
                "Response too short",
                &self.url,
                format!("expected at least {} bytes, got {}", min_len, n)
            ).into());
        }

        buf.truncate(n);
        Ok(buf)
    }
}

pub fn build_connect_packet(transaction_id: u32) -> Vec<u8> {
    let mut packet = Vec::with_capacity(16);
    packet.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    packet.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet
}

pub fn build_announce_packet(connection_id: u64, transaction_id: u32, request: &AnnounceRequest) -> Vec<u8> {
    let mut packet = Vec::with_capacity(98);
    packet.extend_from_slice(&connection_id.to_be_bytes());
    packet.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet.extend_from_slice(&request.info_hash);
    packet.extend_from_slice(&request.peer_id);
    packet.extend_from_slice(&0u64.to_be_bytes()); // downloaded
    packet.extend_from_slice(&request.left.to_be_bytes());
    packet.extend_from_slice(&0u64.to_be_bytes()); // uploaded
    packet.extend_from_slice(&EVENT_NONE.to_be_bytes());
    packet.extend_from_slice(&0u32.to_be_bytes()); // IP address (0 = default)
    packet.extend_from_slice(&ANNOUNCE_KEY.to_be_bytes());
    packet.extend_from_slice(&(-1i32).to_be_bytes()); // num_want (-1 = default)
    packet.extend_from_slice(&request.port.to_be_bytes());
    packet
}

/// First IPv4 address, or the first address of any family
fn prefer_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}

/// Wildcard address of the same family as `remote`
fn local_bind_addr(remote: &SocketAddr) -> SocketAddr {
    if remote.is_ipv6() {
        SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Returns the connection id. Callers guarantee at least 8 bytes.
fn parse_connect_response(response: &[u8], transaction_id: u32) -> std::result::Result<u64, String> {
    let action = read_u32(response, 0);
    let resp_tid = read_u32(response, 4);

    if action == ACTION_ERROR {
        return Err(String::from_utf8_lossy(&response[8..]).to_string());
    }
    if action != ACTION_CONNECT {
        return Err(format!("unexpected action {}", action));
    }
    if resp_tid != transaction_id {
        return Err("transaction id mismatch".to_string());
    }
    if response.len() < CONNECT_RESPONSE_LENGTH {
        return Err(format!("connect response truncated at {} bytes", response.len()));
    }

    let mut id = [0u8; 8];
    id.copy_from_slice(&response[8..16]);
    Ok(u64::from_be_bytes(id))
}

/// Callers guarantee at least 8 bytes.
fn parse_announce_response(response: &[u8], transaction_id: u32) -> std::result::Result<AnnounceResponse, String> {
    let action = read_u32(response, 0);
    let resp_tid = read_u32(response, 4);

    if action == ACTION_ERROR {
        return Err(String::from_utf8_lossy(&response[8..]).to_string());
    }
    if action != ACTION_ANNOUNCE {
        return Err(format!("unexpected action {}", action));
    }
    if resp_tid != transaction_id {
        return Err("transaction id mismatch".to_string());
    }
    if response.len() < ANNOUNCE_HEADER_LENGTH {
        return Err(format!("announce header truncated at {} bytes", response.len()));
    }

    Ok(AnnounceResponse {
        interval: read_u32(response, 8),
        peers: parse_compact_peers(&response[ANNOUNCE_HEADER_LENGTH..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: [0xaa; 20],
            peer_id: [0xbb; 20],
            port: 6881,
            left: 1000,
        }
    }

    #[test]
    fn test_connect_packet_layout() {
        let packet = build_connect_packet(0xdeadbeef);
        assert_eq!(packet.len(), 16);
        assert_eq!(&packet[..8], &0x41727101980u64.to_be_bytes());
        assert_eq!(&packet[8..12], &[0, 0, 0, 0]);
        assert_eq!(&packet[12..], &0xdeadbeefu32.to_be_bytes());
    }

    #[test]
    fn test_announce_packet_layout() {
        let packet = build_announce_packet(7, 9, &request());
        assert_eq!(packet.len(), 98);
        assert_eq!(&packet[..8], &7u64.to_be_bytes());
        assert_eq!(&packet[8..12], &1u32.to_be_bytes());
        assert_eq!(&packet[12..16], &9u32.to_be_bytes());
        assert_eq!(&packet[16..36], &[0xaa; 20]);
        assert_eq!(&packet[36..56], &[0xbb; 20]);
        assert_eq!(&packet[64..72], &1000u64.to_be_bytes());
        assert_eq!(&packet[92..96], &[0xff; 4]);
        assert_eq!(&packet[96..98], &6881u16.to_be_bytes());
    }

    #[test]
    fn test_connect_response() {
        let mut response = vec![0, 0, 0, 0];
        response.extend_from_slice(&5u32.to_be_bytes());
        response.extend_from_slice(&0x1122334455667788u64.to_be_bytes());

        assert_eq!(parse_connect_response(&response, 5), Ok(0x1122334455667788));
        assert!(parse_connect_response(&response, 6).is_err());
    }

    #[test]
    fn test_short_connect_error_keeps_message() {
        let mut response = Vec::new();
        response.extend_from_slice(&3u32.to_be_bytes());
        response.extend_from_slice(&5u32.to_be_bytes());
        response.extend_from_slice(b"busy");
        assert_eq!(response.len(), 12);

        assert_eq!(parse_connect_response(&response, 5), Err("busy".to_string()));
    }

    #[test]
    fn test_truncated_connect_response() {
        let mut response = vec![0, 0, 0, 0];
        response.extend_from_slice(&5u32.to_be_bytes());
        response.extend_from_slice(&[1, 2, 3]);

        let err = parse_connect_response(&response, 5).unwrap_err();
        assert!(err.contains("truncated"));
    }

    #[test]
    fn test_prefers_ipv4_address() {
        let v6: SocketAddr = "[::1]:6969".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:6969".parse().unwrap();

        assert_eq!(prefer_ipv4([v6, v4]), Some(v4));
        assert_eq!(prefer_ipv4([v6]), Some(v6));
        assert_eq!(prefer_ipv4(Vec::<SocketAddr>::new()), None);
    }

    #[test]
    fn test_bind_matches_address_family() {
        let v6: SocketAddr = "[::1]:6969".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:6969".parse().unwrap();

        assert!(local_bind_addr(&v6).is_ipv6());
        assert!(local_bind_addr(&v4).is_ipv4());
        assert_eq!(local_bind_addr(&v4).port(), 0);
    }

    #[test]
    fn test_announce_response_peers() {
        let mut response = Vec::new();
        response.extend_from_slice(&1u32.to_be_bytes());
        response.extend_from_slice(&3u32.to_be_bytes());
        response.extend_from_slice(&1800u32.to_be_bytes());
        response.extend_from_slice(&0u32.to_be_bytes());
        response.extend_from_slice(&1u32.to_be_bytes());
        response.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1]);

        let parsed = parse_announce_response(&response, 3).unwrap();
        assert_eq!(parsed.interval, 1800);
        assert_eq!(parsed.peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_announce_error_action() {
        let mut response = Vec::new();
        response.extend_from_slice(&3u32.to_be_bytes());
        response.extend_from_slice(&3u32.to_be_bytes());
        response.extend_from_slice(b"torrent not registered");

        let err = parse_announce_response(&response, 3).unwrap_err();
        assert_eq!(err, "torrent not registered");
    }

    #[test]
    fn test_url_requires_port() {
        let url = url::Url::parse("udp://tracker.example.com/announce").unwrap();
        assert!(UdpTracker::new(&url, Duration::from_secs(1)).is_err());

        let url = url::Url::parse("udp://tracker.example.com:1337/announce").unwrap();
        let tracker = UdpTracker::new(&url, Duration::from_secs(1)).unwrap();
        assert_eq!(tracker.state(), TrackerState::Idle);
    }
}
