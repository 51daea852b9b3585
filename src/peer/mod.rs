//! Peer module
//!
//! A session per remote peer and its state machine.

pub mod session;
pub mod state;

// Re-export main types
pub use session::PeerSession;
pub use state::PeerState;
