//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use torrent_leech::storage::piece_digest;
use torrent_leech::{Config, TorrentFile, TorrentInfo};

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Builds an in-memory torrent description over a known payload
pub struct TestTorrentBuilder {
    name: String,
    content: Vec<u8>,
    piece_length: u64,
    files: Vec<TorrentFile>,
    announce_list: Vec<String>,
}

impl TestTorrentBuilder {
    pub fn new(name: &str, content: Vec<u8>, piece_length: u64) -> Self {
        Self {
            name: name.to_string(),
            content,
            piece_length,
            files: Vec::new(),
            announce_list: Vec::new(),
        }
    }

    /// Split the payload into files of the given lengths
    pub fn with_file(mut self, path: &str, length: u64) -> Self {
        self.files.push(TorrentFile {
            path: path.split('/').map(str::to_string).collect(),
            length,
        });
        self
    }

    pub fn with_tracker(mut self, url: impl Into<String>) -> Self {
        self.announce_list.push(url.into());
        self
    }

    pub fn build(self) -> TorrentInfo {
        let pieces = self
            .content
            .chunks(self.piece_length as usize)
            .map(piece_digest)
            .collect();

        TorrentInfo {
            announce_list: self.announce_list,
            info_hash: piece_digest(self.name.as_bytes()),
            piece_length: self.piece_length,
            pieces,
            name: self.name,
            total_length: self.content.len() as u64,
            files: self.files,
        }
    }
}

/// The bytes of piece `index` within `content`
pub fn piece_of(content: &[u8], piece_length: usize, index: usize) -> Vec<u8> {
    content.chunks(piece_length).nth(index).unwrap().to_vec()
}

/// Short timeouts so failing peers are dropped quickly
pub fn test_config(output_dir: &Path) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_millis(500),
        tracker_timeout: Duration::from_secs(1),
        unavailable_backoff: Duration::from_millis(5),
        ..Config::default()
    }
}
