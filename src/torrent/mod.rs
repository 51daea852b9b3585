//! Torrent metadata module
//!
//! Parses .torrent files into the read-only description the rest of the
//! client works from.

pub mod parser;
pub mod info;

pub use parser::TorrentParser;
pub use info::{TorrentInfo, TorrentFile};
