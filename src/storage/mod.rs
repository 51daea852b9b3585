//! Storage module
//!
//! Piece assembly and verification, and writing verified bytes to the
//! output files.

pub mod backend;
pub mod piece;
pub mod file;

pub use backend::StorageBackend;
pub use piece::{piece_digest, verify_piece, Block, Piece, BLOCK_SIZE};
pub use file::{map_range, FileEntry, FileStorage, WriteSpan};
