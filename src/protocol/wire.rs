//! Wire protocol I/O
//!
//! Async framed reads and writes over any byte stream, with a deadline on
//! every read.

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tracing::{trace, warn};

use crate::error::TorrentError;
use super::handshake::HANDSHAKE_LENGTH;
use super::message::MAX_MESSAGE_LENGTH;
use super::{Handshake, Message};

/// Default deadline for a single framed read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// WireProtocol trait for protocol utilities
pub trait WireProtocol {
    /// Read a complete message from the stream
    async fn read_message<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Message>;

    /// Write a message to the stream
    async fn write_message<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, message: &Message) -> Result<()>;

    /// Read a handshake from the stream
    async fn read_handshake<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Handshake>;

    /// Write a handshake to the stream
    async fn write_handshake<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, handshake: &Handshake) -> Result<()>;
}

/// Default implementation of WireProtocol
#[derive(Debug, Clone, Copy)]
pub struct BitTorrentWire {
    read_timeout: Duration,
}

impl BitTorrentWire {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// `read_exact` bounded by the read deadline. Timeouts become
    /// `TimeoutError`, stream failures become `PeerError`.
    async fn read_exact_timed<R: AsyncReadExt + Unpin>(&self, reader: &mut R, buf: &mut [u8]) -> Result<()> {
        match timeout(self.read_timeout, reader.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                trace!("Stream read failed: {}", e);
                Err(TorrentError::PeerError {
                    message: "Failed to read from peer".to_string(),
                    peer: None,
                    source: Some(e.to_string()),
                }.into())
            }
            Err(_) => {
                warn!("Read timed out after {:?}", self.read_timeout);
                Err(TorrentError::timeout_error(format!("no data within {:?}", self.read_timeout)).into())
            }
        }
    }

    async fn write_all<W: AsyncWriteExt + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }.await;

        result.map_err(|e| {
            TorrentError::PeerError {
                message: "Failed to write to peer".to_string(),
                peer: None,
                source: Some(e.to_string()),
            }.into()
        })
    }
}

impl Default for BitTorrentWire {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl WireProtocol for BitTorrentWire {
    async fn read_message<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Message> {
        let mut length_buf = [0u8; 4];
        self.read_exact_timed(reader, &mut length_buf).await?;
        let length = u32::from_be_bytes(length_buf) as usize;

        if length == 0 {
            trace!("Received keep-alive");
            return Ok(Message::KeepAlive);
        }

        if length > MAX_MESSAGE_LENGTH {
            return Err(TorrentError::protocol_error_with_source(
                "Frame exceeds maximum message length",
                format!("{} > {}", length, MAX_MESSAGE_LENGTH)
            ).into());
        }

        let mut frame = vec![0u8; length];
        self.read_exact_timed(reader, &mut frame).await?;

        Message::from_parts(frame[0], &frame[1..])
    }

    async fn write_message<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, message: &Message) -> Result<()> {
        Self::write_all(writer, &message.serialize()).await
    }

    async fn read_handshake<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Handshake> {
        let mut buf = [0u8; HANDSHAKE_LENGTH];
        self.read_exact_timed(reader, &mut buf).await?;
        Handshake::deserialize(&buf)
    }

    async fn write_handshake<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, handshake: &Handshake) -> Result<()> {
        Self::write_all(writer, &handshake.serialize()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_message_over_stream() {
        let (mut client, mut server) = duplex(1024);
        let mut wire = BitTorrentWire::default();

        wire.write_message(&mut client, &Message::request(0, 16384, 16384)).await.unwrap();
        wire.write_message(&mut client, &Message::KeepAlive).await.unwrap();
        wire.write_message(&mut client, &Message::Unchoke).await.unwrap();

        assert_eq!(wire.read_message(&mut server).await.unwrap(), Message::request(0, 16384, 16384));
        assert_eq!(wire.read_message(&mut server).await.unwrap(), Message::KeepAlive);
        assert_eq!(wire.read_message(&mut server).await.unwrap(), Message::Unchoke);
    }

    #[tokio::test]
    async fn test_handshake_over_stream() {
        let (mut client, mut server) = duplex(1024);
        let mut wire = BitTorrentWire::default();
        let handshake = Handshake::new([7u8; 20], [8u8; 20]);

        wire.write_handshake(&mut client, &handshake).await.unwrap();
        assert_eq!(wire.read_handshake(&mut server).await.unwrap(), handshake);
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (_client, mut server) = duplex(1024);
        let mut wire = BitTorrentWire::new(Duration::from_millis(50));

        let err = wire.read_message(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::TimeoutError { .. })
        ));
    }

    #[tokio::test]
    async fn test_eof_is_peer_error() {
        let (client, mut server) = duplex(1024);
        drop(client);
        let mut wire = BitTorrentWire::default();

        let err = wire.read_message(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::PeerError { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&(MAX_MESSAGE_LENGTH as u32 + 1).to_be_bytes()).await.unwrap();
        let mut wire = BitTorrentWire::default();

        let err = wire.read_message(&mut server).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::ProtocolError { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_consumes_frame() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&[0, 0, 0, 2, 20, 0xaa]).await.unwrap();
        client.write_all(&Message::Choke.serialize()).await.unwrap();
        let mut wire = BitTorrentWire::default();

        assert!(wire.read_message(&mut server).await.is_err());
        assert_eq!(wire.read_message(&mut server).await.unwrap(), Message::Choke);
    }
}
