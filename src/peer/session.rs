//! Peer session
//!
//! Owns one TCP connection to one peer: handshake, bitfield exchange,
//! choke tracking and pipelined block requests.

use std::collections::HashSet;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::cli::Config;
use crate::error::TorrentError;
use crate::peer::PeerState;
use crate::protocol::{BitTorrentWire, Bitfield, Handshake, Message, WireProtocol};
use crate::storage::Piece;
use crate::torrent::TorrentInfo;

/// A live connection to a single peer
#[derive(Debug)]
pub struct PeerSession {
    addr: SocketAddr,
    stream: TcpStream,
    wire: BitTorrentWire,
    state: PeerState,
    /// Pieces the peer has announced
    bitfield: Bitfield,
    remote_peer_id: Option<[u8; 20]>,
    pipeline_depth: usize,
    /// Pieces in the torrent; bounds every index the peer sends
    piece_count: usize,
}

impl PeerSession {
    /// Dial the peer and perform the handshake
    pub async fn connect(addr: SocketAddr, info_hash: [u8; 20], config: &Config) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                debug!("Connection timeout to {}", addr);
                TorrentError::timeout_error(format!("connect to {} after {:?}", addr, config.connect_timeout))
            })?
            .map_err(|e| {
                debug!("Failed to connect to {}: {}", addr, e);
                TorrentError::peer_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;

        let mut session = Self {
            addr,
            stream,
            wire: BitTorrentWire::new(config.read_timeout),
            state: PeerState::Handshaking,
            bitfield: Bitfield::default(),
            remote_peer_id: None,
            pipeline_depth: config.pipeline_depth.max(1),
            piece_count: 0,
        };

        session.perform_handshake(info_hash, config.peer_id).await?;
        info!("Handshake complete with peer: {}", addr);
        Ok(session)
    }

    async fn perform_handshake(&mut self, info_hash: [u8; 20], our_peer_id: [u8; 20]) -> Result<()> {
        let ours = Handshake::new(info_hash, our_peer_id);
        if let Err(e) = self.wire.write_handshake(&mut self.stream, &ours).await {
            self.state = PeerState::Failed;
            return Err(e);
        }

        let theirs = match self.wire.read_handshake(&mut self.stream).await {
            Ok(handshake) => handshake,
            Err(e) => {
                self.state = PeerState::Failed;
                return Err(e);
            }
        };

        if let Err(e) = theirs.validate(&info_hash) {
            self.state = PeerState::Failed;
            return Err(TorrentError::handshake_error_with_peer(e.to_string(), self.addr.to_string()).into());
        }

        self.remote_peer_id = Some(theirs.peer_id);
        self.state = PeerState::AwaitingBitfield;
        debug!("Peer {} -> {}", self.addr, self.state);
        Ok(())
    }

    /// Advertise an empty bitfield, wait for the peer's bitfield, declare
    /// interest and wait to be unchoked.
    pub async fn announce_interested(&mut self, piece_count: usize) -> Result<()> {
        self.piece_count = piece_count;
        self.bitfield = Bitfield::new(piece_count);

        let ours = Bitfield::new(piece_count);
        self.send(&Message::Bitfield { bitfield: ours.into_bytes() }).await?;

        let mut unchoked_early = false;
        loop {
            match self.receive().await? {
                Message::Bitfield { bitfield } => {
                    self.accept_bitfield(bitfield)?;
                    break;
                }
                Message::Have { piece_index } => self.record_have(piece_index),
                Message::Unchoke => unchoked_early = true,
                Message::Choke => unchoked_early = false,
                Message::KeepAlive => {}
                other => {
                    self.state = PeerState::Failed;
                    return Err(TorrentError::protocol_error_with_source(
                        "Expected bitfield",
                        format!("peer {} sent {:?}", self.addr, other.message_id())
                    ).into());
                }
            }
        }
        debug!("Peer {} has {} pieces", self.addr, self.bitfield.count());

        self.state = PeerState::Choked;
        self.send(&Message::interested()).await?;

        if unchoked_early {
            self.state = PeerState::Unchoked;
        }

        while !self.state.can_request() {
            match self.receive().await? {
                Message::Unchoke => self.state = PeerState::Unchoked,
                Message::Choke => trace!("Peer {} still choking", self.addr),
                Message::Have { piece_index } => self.record_have(piece_index),
                other => trace!("Ignoring {:?} from {} while choked", other.message_id(), self.addr),
            }
        }

        debug!("Peer {} -> {}", self.addr, self.state);
        Ok(())
    }

    /// Download one piece, keeping up to `pipeline_depth` block requests in
    /// flight. Responses are matched by `(index, begin)`. The bytes are not
    /// hash-checked here.
    pub async fn request_piece(&mut self, index: u32, torrent: &TorrentInfo) -> Result<Vec<u8>> {
        let length = torrent.piece_size(index as usize);
        if length == 0 && torrent.piece_hash(index as usize).is_none() {
            return Err(TorrentError::piece_request_error("Piece index out of range", index).into());
        }

        let mut piece = Piece::new(index, length as u32);
        let blocks = piece.blocks().to_vec();
        let mut next = 0;
        let mut outstanding: HashSet<u32> = HashSet::new();
        let deadline = Instant::now() + self.wire.read_timeout() * (blocks.len() as u32 + 1);

        trace!("Requesting piece {} ({} bytes, {} blocks) from {}", index, length, blocks.len(), self.addr);

        while !piece.is_complete() {
            while self.state.can_request() && outstanding.len() < self.pipeline_depth && next < blocks.len() {
                let block = blocks[next];
                self.send(&Message::request(index, block.offset, block.length)).await
                    .map_err(|e| TorrentError::piece_request_error_with_source("Failed to send request", index, e.to_string()))?;
                outstanding.insert(block.offset);
                next += 1;
            }

            if Instant::now() >= deadline {
                return Err(TorrentError::piece_request_error_with_source(
                    "Piece not delivered in time",
                    index,
                    format!("{} of {} blocks received", piece.downloaded_blocks(), blocks.len())
                ).into());
            }

            let message = self.receive().await
                .map_err(|e| TorrentError::piece_request_error_with_source("Read failed", index, e.to_string()))?;

            match message {
                Message::Piece { index: got, begin, block } => {
                    if got != index || !outstanding.remove(&begin) {
                        trace!("Ignoring stale block {}:{} from {}", got, begin, self.addr);
                        continue;
                    }
                    piece.add_block(begin, &block)?;
                }
                Message::Choke => {
                    debug!("Peer {} choked us mid-piece", self.addr);
                    self.state = PeerState::Choked;
                }
                Message::Unchoke => {
                    if self.state == PeerState::Choked {
                        self.state = PeerState::Unchoked;
                        // choking discards queued requests on the peer side
                        for &offset in &outstanding {
                            let Some(block) = blocks.iter().find(|b| b.offset == offset) else {
                                continue;
                            };
                            self.send(&Message::request(index, block.offset, block.length)).await
                                .map_err(|e| TorrentError::piece_request_error_with_source("Failed to send request", index, e.to_string()))?;
                        }
                    }
                }
                Message::Have { piece_index } => self.record_have(piece_index),
                Message::KeepAlive => {}
                other => {
                    return Err(TorrentError::piece_request_error_with_source(
                        "Unexpected message",
                        index,
                        format!("{:?}", other.message_id())
                    ).into());
                }
            }
        }

        Ok(piece.into_data())
    }

    /// Replace the bitfield with the peer's, keeping any `have` seen before
    /// it. The payload must be exactly as long as the piece count requires.
    fn accept_bitfield(&mut self, bytes: Vec<u8>) -> Result<()> {
        let expected = Bitfield::byte_len(self.piece_count);
        if bytes.len() != expected {
            self.state = PeerState::Failed;
            return Err(TorrentError::protocol_error_with_source(
                "Bitfield has wrong length",
                format!("peer {} sent {} bytes, expected {}", self.addr, bytes.len(), expected)
            ).into());
        }

        let mut theirs = Bitfield::from_bytes(bytes);
        for index in 0..self.piece_count {
            if self.bitfield.has_piece(index) {
                theirs.set_piece(index);
            }
        }
        self.bitfield = theirs;
        Ok(())
    }

    fn record_have(&mut self, piece_index: u32) {
        if (piece_index as usize) < self.piece_count {
            self.bitfield.set_piece(piece_index as usize);
        } else {
            warn!("Peer {} announced piece {} of {}; ignoring", self.addr, piece_index, self.piece_count);
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        trace!("Sending {:?} to {}", message.message_id(), self.addr);
        let result = self.wire.write_message(&mut self.stream, message).await;
        if result.is_err() {
            self.state = PeerState::Failed;
        }
        result
    }

    /// Any read failure leaves the stream at an unknown frame boundary, so
    /// the session is marked failed.
    async fn receive(&mut self) -> Result<Message> {
        match self.wire.read_message(&mut self.stream).await {
            Ok(message) => {
                trace!("Received {:?} from {}", message.message_id(), self.addr);
                Ok(message)
            }
            Err(e) => {
                warn!("Read from peer {} failed: {}", self.addr, e);
                self.state = PeerState::Failed;
                Err(e)
            }
        }
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if self.state.is_usable() {
            let _ = self.stream.shutdown().await;
            self.state = PeerState::Closed;
            debug!("Closed connection to peer: {}", self.addr);
        }
    }

    /// Whether the peer announced the piece
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index as usize)
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.remote_peer_id
    }
}
