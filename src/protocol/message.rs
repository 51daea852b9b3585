//! Peer wire messages
//!
//! Length-prefixed frames: 4-byte big-endian length, 1-byte id, payload.
//! A zero length frame is a keep-alive.

use bytes::{Buf, BufMut, BytesMut};
use anyhow::Result;
use tracing::{error, trace};

use crate::error::TorrentError;

/// Largest frame accepted from a peer: a 1 MiB block plus the piece header.
pub const MAX_MESSAGE_LENGTH: usize = (1 << 20) + 13;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => {
                error!("Invalid message ID: {}", value);
                Err(TorrentError::protocol_error_with_source(
                    "Invalid message ID",
                    format!("value: {}", value)
                ).into())
            }
        }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Block request for `length` bytes at `begin` within piece `index`
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        Message::Request { index, begin, length }
    }

    pub fn interested() -> Self {
        Message::Interested
    }

    /// Get the message ID (returns None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::KeepAlive => None,
        }
    }

    /// Get the message length (excluding the length prefix)
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
        }
    }

    /// Serialize the message to bytes (including length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing message: {:?}", self.message_id());
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);

        buf.put_u32(self.length());
        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }

        match self {
            Message::Have { piece_index } => buf.put_u32(*piece_index),
            Message::Bitfield { bitfield } => buf.put_slice(bitfield),
            Message::Request { index, begin, length }
            | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            _ => {}
        }

        buf.to_vec()
    }

    /// Deserialize a message from bytes (including length prefix)
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(TorrentError::protocol_error("Message shorter than length prefix").into());
        }

        let mut buf = data;
        let length = buf.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if buf.remaining() != length {
            return Err(TorrentError::protocol_error_with_source(
                "Frame length mismatch",
                format!("prefix says {}, got {}", length, buf.remaining())
            ).into());
        }

        let id = buf.get_u8();
        Self::from_parts(id, buf)
    }

    /// Build a message from its id byte and payload
    pub fn from_parts(id: u8, payload: &[u8]) -> Result<Self> {
        let message_id = MessageId::try_from(id)?;
        let mut buf = payload;

        let expect_len = |needed: usize, exact: bool| -> Result<()> {
            let ok = if exact { payload.len() == needed } else { payload.len() >= needed };
            if ok {
                Ok(())
            } else {
                Err(TorrentError::protocol_error_with_source(
                    format!("{:?} message has wrong payload size", message_id),
                    format!("expected {}{} bytes, got {}", if exact { "" } else { "at least " }, needed, payload.len())
                ).into())
            }
        };

        let message = match message_id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                expect_len(4, true)?;
                Message::Have { piece_index: buf.get_u32() }
            }
            MessageId::Bitfield => Message::Bitfield { bitfield: payload.to_vec() },
            MessageId::Request => {
                expect_len(12, true)?;
                Message::Request { index: buf.get_u32(), begin: buf.get_u32(), length: buf.get_u32() }
            }
            MessageId::Piece => {
                expect_len(8, false)?;
                let index = buf.get_u32();
                let begin = buf.get_u32();
                Message::Piece { index, begin, block: buf.to_vec() }
            }
            MessageId::Cancel => {
                expect_len(12, true)?;
                Message::Cancel { index: buf.get_u32(), begin: buf.get_u32(), length: buf.get_u32() }
            }
        };

        trace!("Parsed {:?} message ({} payload bytes)", message_id, payload.len());
        Ok(message)
    }
}
