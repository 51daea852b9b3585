//! Piece assembly and verification
//!
//! A `Piece` is split into 16 KiB blocks for requesting; blocks may arrive in
//! any order and are placed by their offset. The assembled bytes are only
//! trusted once their SHA1 matches the torrent's digest.

use sha1::{Digest, Sha1};
use anyhow::Result;

use crate::error::TorrentError;

/// Wire-level request granularity
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// A block request within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Piece index this block belongs to
    pub piece_index: u32,
    /// Offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

/// SHA1 digest of a piece's bytes
pub fn piece_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA1 of `data` compared against `expected`
pub fn verify_piece(data: &[u8], expected: &[u8; 20]) -> bool {
    piece_digest(data) == *expected
}

/// A piece being downloaded
#[derive(Debug, Clone)]
pub struct Piece {
    /// Piece index
    pub index: u32,
    data: Vec<u8>,
    blocks: Vec<Block>,
    received: Vec<bool>,
}

impl Piece {
    /// Create an empty piece of `length` bytes
    pub fn new(index: u32, length: u32) -> Self {
        let blocks: Vec<Block> = (0..length)
            .step_by(BLOCK_SIZE as usize)
            .map(|offset| Block {
                piece_index: index,
                offset,
                length: std::cmp::min(BLOCK_SIZE, length - offset),
            })
            .collect();

        Self {
            index,
            data: vec![0u8; length as usize],
            received: vec![false; blocks.len()],
            blocks,
        }
    }

    /// Block requests covering the whole piece, in offset order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Store a block. Returns `Ok(false)` when the offset is not a block
    /// boundary of this piece or the block was already stored, and an error
    /// when the length differs from what was requested.
    pub fn add_block(&mut self, offset: u32, data: &[u8]) -> Result<bool> {
        if offset % BLOCK_SIZE != 0 {
            return Ok(false);
        }
        let block_index = (offset / BLOCK_SIZE) as usize;
        let Some(block) = self.blocks.get(block_index).copied() else {
            return Ok(false);
        };
        if self.received[block_index] {
            return Ok(false);
        }

        if data.len() != block.length as usize {
            return Err(TorrentError::piece_request_error_with_source(
                "Block has wrong length",
                self.index,
                format!("offset {}: expected {} bytes, got {}", offset, block.length, data.len())
            ).into());
        }

        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        self.received[block_index] = true;
        Ok(true)
    }

    /// Check if all blocks are downloaded
    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }

    /// Number of blocks stored so far
    pub fn downloaded_blocks(&self) -> usize {
        self.received.iter().filter(|&&r| r).count()
    }

    /// Take the assembled bytes
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_is_idempotent() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let hash = piece_digest(&data);
        for _ in 0..3 {
            assert!(verify_piece(&data, &hash));
        }
    }

    #[test]
    fn test_single_bit_flip_fails() {
        let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        let hash = piece_digest(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!verify_piece(&corrupted, &hash));
            }
        }
    }

    #[test]
    fn test_block_plan_last_block_shorter() {
        let piece = Piece::new(3, BLOCK_SIZE * 2 + 100);
        let blocks = piece.blocks();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], Block { piece_index: 3, offset: 0, length: BLOCK_SIZE });
        assert_eq!(blocks[2], Block { piece_index: 3, offset: BLOCK_SIZE * 2, length: 100 });
    }

    #[test]
    fn test_out_of_order_assembly() {
        let data: Vec<u8> = (0..(BLOCK_SIZE + 10)).map(|i| (i % 7) as u8).collect();
        let mut piece = Piece::new(0, data.len() as u32);

        assert!(piece.add_block(BLOCK_SIZE, &data[BLOCK_SIZE as usize..]).unwrap());
        assert!(!piece.is_complete());
        assert!(piece.add_block(0, &data[..BLOCK_SIZE as usize]).unwrap());
        assert!(piece.is_complete());

        assert_eq!(piece.into_data(), data);
    }

    #[test]
    fn test_unknown_and_duplicate_blocks_ignored() {
        let mut piece = Piece::new(0, 10);

        assert!(!piece.add_block(5, &[0u8; 5]).unwrap());
        assert!(!piece.add_block(BLOCK_SIZE, &[0u8; 10]).unwrap());
        assert!(piece.add_block(0, &[1u8; 10]).unwrap());
        assert!(!piece.add_block(0, &[2u8; 10]).unwrap());
        assert_eq!(piece.downloaded_blocks(), 1);
    }

    #[test]
    fn test_wrong_length_block_rejected() {
        let mut piece = Piece::new(0, 10);
        assert!(piece.add_block(0, &[0u8; 9]).is_err());
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(hex::encode(piece_digest(b"abc")), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_empty_piece() {
        let piece = Piece::new(0, 0);
        assert!(piece.blocks().is_empty());
        assert!(piece.is_complete());
        assert!(verify_piece(&piece.into_data(), &piece_digest(b"")));
    }
}
