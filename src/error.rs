//! Error types for the torrent client
//!
//! Every failure the client can hit is a `TorrentError`. Per-tracker, per-peer
//! and per-piece failures are absorbed where they happen; only decode, config
//! and output-storage failures are fatal to a download.

use std::fmt;

/// Error type for torrent operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Malformed torrent metadata
    ParseError {
        message: String,
        source: Option<String>,
    },

    /// A single tracker failed (timeout, bad response, transaction mismatch)
    TrackerError {
        message: String,
        tracker: Option<String>,
        source: Option<String>,
    },

    /// The peer handshake was rejected or malformed
    HandshakeError {
        message: String,
        peer: Option<String>,
    },

    /// A wire message violated the peer protocol
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Dial or connection-level failure with a peer
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// A piece request could not be completed by a peer
    PieceRequestError {
        message: String,
        piece: u32,
        source: Option<String>,
    },

    /// Downloaded piece bytes did not match the expected digest
    HashMismatch {
        piece: u32,
        expected: String,
        actual: String,
    },

    /// Output file I/O errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Invalid configuration
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// A network read or dial exceeded its deadline
    TimeoutError {
        message: String,
    },
}

impl TorrentError {
    /// Create a new ParseError
    pub fn parse_error(message: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ParseError with source
    pub fn parse_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new TrackerError with the tracker URL
    pub fn tracker_error(message: impl Into<String>, tracker: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            tracker: Some(tracker.into()),
            source: None,
        }
    }

    /// Create a new TrackerError with tracker URL and source
    pub fn tracker_error_full(message: impl Into<String>, tracker: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            tracker: Some(tracker.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new HandshakeError
    pub fn handshake_error(message: impl Into<String>) -> Self {
        TorrentError::HandshakeError {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new HandshakeError with peer address
    pub fn handshake_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::HandshakeError {
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerError with peer address
    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new PeerError with peer and source
    pub fn peer_error_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new PieceRequestError
    pub fn piece_request_error(message: impl Into<String>, piece: u32) -> Self {
        TorrentError::PieceRequestError {
            message: message.into(),
            piece,
            source: None,
        }
    }

    /// Create a new PieceRequestError with source
    pub fn piece_request_error_with_source(message: impl Into<String>, piece: u32, source: impl Into<String>) -> Self {
        TorrentError::PieceRequestError {
            message: message.into(),
            piece,
            source: Some(source.into()),
        }
    }

    /// Create a new HashMismatch error
    pub fn hash_mismatch(piece: u32, expected: &[u8], actual: &[u8]) -> Self {
        TorrentError::HashMismatch {
            piece,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new TimeoutError
    pub fn timeout_error(message: impl Into<String>) -> Self {
        TorrentError::TimeoutError {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole download.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TorrentError::ParseError { .. }
                | TorrentError::StorageError { .. }
                | TorrentError::ConfigError { .. }
        )
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            TorrentError::ParseError { source, .. }
            | TorrentError::TrackerError { source, .. }
            | TorrentError::ProtocolError { source, .. }
            | TorrentError::PeerError { source, .. }
            | TorrentError::PieceRequestError { source, .. }
            | TorrentError::StorageError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::ParseError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Parse error: {} (source: {})", message, src)
                } else {
                    write!(f, "Parse error: {}", message)
                }
            }
            TorrentError::TrackerError { message, tracker, source } => {
                match (tracker, source) {
                    (Some(t), Some(s)) => write!(f, "Tracker error: {} (tracker: {}, source: {})", message, t, s),
                    (Some(t), None) => write!(f, "Tracker error: {} (tracker: {})", message, t),
                    (None, Some(s)) => write!(f, "Tracker error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Tracker error: {}", message),
                }
            }
            TorrentError::HandshakeError { message, peer } => {
                if let Some(p) = peer {
                    write!(f, "Handshake error: {} (peer: {})", message, p)
                } else {
                    write!(f, "Handshake error: {}", message)
                }
            }
            TorrentError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            TorrentError::PeerError { message, peer, source } => {
                match (peer, source) {
                    (Some(p), Some(s)) => write!(f, "Peer error: {} (peer: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Peer error: {} (peer: {})", message, p),
                    (None, Some(s)) => write!(f, "Peer error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Peer error: {}", message),
                }
            }
            TorrentError::PieceRequestError { message, piece, source } => {
                if let Some(src) = source {
                    write!(f, "Piece request error: {} (piece: {}, source: {})", message, piece, src)
                } else {
                    write!(f, "Piece request error: {} (piece: {})", message, piece)
                }
            }
            TorrentError::HashMismatch { piece, expected, actual } => {
                write!(f, "Hash mismatch for piece {} (expected: {}, actual: {})", piece, expected, actual)
            }
            TorrentError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
            TorrentError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            TorrentError::TimeoutError { message } => write!(f, "Timeout: {}", message),
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<serde_bencode::Error> for TorrentError {
    fn from(err: serde_bencode::Error) -> Self {
        TorrentError::parse_error_with_source("Failed to parse bencode data", err.to_string())
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::ConfigError {
            message: format!("Failed to parse address: {}", err),
            field: None,
        }
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::timeout_error("Operation timed out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error() {
        let err = TorrentError::parse_error("Invalid torrent file");
        assert_eq!(err.to_string(), "Parse error: Invalid torrent file");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_tracker_error_full() {
        let err = TorrentError::tracker_error_full("Bad response", "udp://tracker:80", "short packet");
        let text = err.to_string();
        assert!(text.contains("Tracker error"));
        assert!(text.contains("udp://tracker:80"));
        assert!(text.contains("short packet"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_per_peer_errors_are_not_fatal() {
        assert!(!TorrentError::handshake_error("bad pstrlen").is_fatal());
        assert!(!TorrentError::protocol_error("bad id").is_fatal());
        assert!(!TorrentError::peer_error_with_peer("reset", "127.0.0.1:6881").is_fatal());
        assert!(!TorrentError::piece_request_error("timeout", 3).is_fatal());
        assert!(!TorrentError::hash_mismatch(3, &[0u8; 20], &[1u8; 20]).is_fatal());
        assert!(!TorrentError::timeout_error("read").is_fatal());
    }

    #[test]
    fn test_hash_mismatch_display() {
        let err = TorrentError::hash_mismatch(7, &[0xab; 20], &[0xcd; 20]);
        let text = err.to_string();
        assert!(text.contains("piece 7"));
        assert!(text.contains(&"ab".repeat(20)));
        assert!(text.contains(&"cd".repeat(20)));
    }

    #[test]
    fn test_with_context() {
        let err = TorrentError::parse_error("Invalid data").with_context("while parsing torrent");
        assert!(err.to_string().contains("while parsing torrent"));
    }

    #[test]
    fn test_from_io_error_is_fatal_storage() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TorrentError = io_err.into();
        assert!(matches!(err, TorrentError::StorageError { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_from_addr_parse_error() {
        let addr_err = "invalid:address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: TorrentError = addr_err.into();
        assert!(matches!(err, TorrentError::ConfigError { .. }));
    }
}
