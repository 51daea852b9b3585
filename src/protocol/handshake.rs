//! BitTorrent handshake protocol
//!
//! The 68-byte greeting exchanged before any framed message:
//! `pstrlen(19) | "BitTorrent protocol" | 8 reserved | info_hash | peer_id`.

use bytes::{BufMut, BytesMut};
use anyhow::Result;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Total handshake size in bytes
pub const HANDSHAKE_LENGTH: usize = 68;

/// Client prefix used in generated peer ids
pub const PEER_ID_PREFIX: &[u8; 8] = b"-TL0001-";

/// BitTorrent handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol identifier as received
    pub protocol_id: [u8; 19],
    /// Reserved bytes; always zero when we send
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a new handshake with info_hash and peer_id
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        debug!("Creating new handshake for info_hash: {}", hex::encode(info_hash));
        Self {
            protocol_id: *PROTOCOL_STRING,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Generate a random peer ID: the client prefix followed by 12 random bytes
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());
        info!("Generated new peer ID: {}", hex::encode(peer_id));
        peer_id
    }

    /// Serialize the handshake to bytes
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing handshake");
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LENGTH);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(&self.protocol_id);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize a handshake from exactly 68 bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        trace!("Deserializing handshake from {} bytes", data.len());

        if data.len() != HANDSHAKE_LENGTH {
            error!("Handshake has wrong size: expected {} bytes, got {}", HANDSHAKE_LENGTH, data.len());
            return Err(TorrentError::handshake_error(
                format!("expected {} bytes, got {}", HANDSHAKE_LENGTH, data.len())
            ).into());
        }

        let protocol_length = data[0];
        if protocol_length != PROTOCOL_LENGTH {
            warn!("Invalid protocol length: expected {}, got {}", PROTOCOL_LENGTH, protocol_length);
            return Err(TorrentError::handshake_error(
                format!("invalid protocol length {}", protocol_length)
            ).into());
        }

        let mut protocol_id = [0u8; 19];
        protocol_id.copy_from_slice(&data[1..20]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        debug!("Handshake from peer_id {} for info_hash {}", hex::encode(peer_id), hex::encode(info_hash));
        Ok(Self {
            protocol_id,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Check that the remote side is in the same swarm
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> Result<()> {
        if self.info_hash != *expected_info_hash {
            warn!("Handshake validation failed: info hash mismatch");
            warn!("  Expected: {}", hex::encode(expected_info_hash));
            warn!("  Got:      {}", hex::encode(self.info_hash));
            return Err(TorrentError::handshake_error("info hash mismatch").into());
        }

        debug!("Handshake validation successful");
        Ok(())
    }
}
