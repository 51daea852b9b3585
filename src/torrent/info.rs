//! Torrent information structures
//!
//! The decoded, read-only description of a torrent: piece plan, file layout,
//! tracker list and info hash.

use sha1::{Digest, Sha1};
use anyhow::Result;

use crate::error::TorrentError;

/// A file declared by a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Relative path components (e.g., ["folder", "subfolder", "file.txt"])
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
}

/// High-level torrent information, immutable after parsing
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Tracker URLs: `announce` first, then the flattened `announce-list`
    pub announce_list: Vec<String>,
    /// SHA1 of the raw info dictionary bytes
    pub info_hash: [u8; 20],
    /// Size of each piece in bytes (the last one may be shorter)
    pub piece_length: u64,
    /// One SHA1 digest per piece
    pub pieces: Vec<[u8; 20]>,
    /// Torrent name
    pub name: String,
    /// Sum of all file lengths
    pub total_length: u64,
    /// Declared files; empty for single-file torrents
    pub files: Vec<TorrentFile>,
}

impl TorrentInfo {
    /// Total size of all files in the torrent
    pub fn total_size(&self) -> u64 {
        self.total_length
    }

    /// Number of pieces in the torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_multi_file(&self) -> bool {
        !self.files.is_empty()
    }

    /// Output files in layout order. Single-file torrents yield one entry
    /// named after the torrent.
    pub fn output_files(&self) -> Vec<TorrentFile> {
        if self.is_multi_file() {
            self.files.clone()
        } else {
            vec![TorrentFile {
                path: vec![self.name.clone()],
                length: self.total_length,
            }]
        }
    }

    /// Get info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Generate info hash from the raw info dictionary bytes
    pub fn generate_info_hash(info_dict_bytes: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(info_dict_bytes);
        hasher.finalize().into()
    }

    /// Split the concatenated `pieces` string into 20-byte digests
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::parse_error_with_source(
                "Pieces field length must be a multiple of 20",
                format!("got {}", pieces_bytes.len()),
            ).into());
        }

        Ok(pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    /// Expected digest for a piece
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Absolute byte offset of a piece within the concatenated content
    pub fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_length
    }

    /// Byte length of a piece; the last piece may be shorter than `piece_length`.
    /// Returns 0 for an out-of-range index.
    pub fn piece_size(&self, index: usize) -> u64 {
        match self.piece_range(index) {
            Some((start, end)) => end - start,
            None => 0,
        }
    }

    /// Byte range `[start, end)` covered by a piece
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.pieces.len() {
            return None;
        }

        let start = self.piece_offset(index);
        let end = std::cmp::min(start + self.piece_length, self.total_length);
        Some((start, end))
    }
}
