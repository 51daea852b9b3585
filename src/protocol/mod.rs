//! BitTorrent protocol module
//!
//! Implements the BitTorrent peer-to-peer protocol.

pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod wire;

// Re-export main types
pub use bitfield::Bitfield;
pub use handshake::{Handshake, HANDSHAKE_LENGTH, PROTOCOL_STRING, PROTOCOL_LENGTH};
pub use message::{Message, MessageId, MAX_MESSAGE_LENGTH};
pub use wire::{BitTorrentWire, WireProtocol, DEFAULT_READ_TIMEOUT};
