//! Peer state module
//!
//! Lifecycle of a single peer session.

use std::fmt;

/// State of a peer session
///
/// `Disconnected -> Handshaking -> AwaitingBitfield -> Choked <-> Unchoked`,
/// ending in `Closed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Initial state, no connection
    #[default]
    Disconnected,
    /// Connected, exchanging handshakes
    Handshaking,
    /// Handshake accepted, waiting for the peer's bitfield
    AwaitingBitfield,
    /// The peer will not serve requests
    Choked,
    /// The peer will serve requests
    Unchoked,
    /// Shut down by us
    Closed,
    /// The connection can no longer be used
    Failed,
}

impl PeerState {
    /// Whether the session can still carry traffic
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            PeerState::Handshaking
                | PeerState::AwaitingBitfield
                | PeerState::Choked
                | PeerState::Unchoked
        )
    }

    /// Check if we can send block requests
    pub fn can_request(&self) -> bool {
        matches!(self, PeerState::Unchoked)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Disconnected => "disconnected",
            PeerState::Handshaking => "handshaking",
            PeerState::AwaitingBitfield => "awaiting-bitfield",
            PeerState::Choked => "choked",
            PeerState::Unchoked => "unchoked",
            PeerState::Closed => "closed",
            PeerState::Failed => "failed",
        };
        f.write_str(name)
    }
}
