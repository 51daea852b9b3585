//! Download progress snapshot

use std::fmt;

/// Point-in-time view of a download for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Pieces verified and written
    pub completed_pieces: usize,
    pub total_pieces: usize,
    /// Peers that completed the handshake and interest exchange
    pub connected_peers: usize,
    /// Peer workers currently running
    pub active_peers: usize,
    /// Piece attempts that failed and were requeued
    pub failed_attempts: usize,
    /// Bytes verified and written
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
}

impl DownloadProgress {
    pub fn is_complete(&self) -> bool {
        self.completed_pieces == self.total_pieces
    }

    /// Completed fraction in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total_pieces == 0 {
            1.0
        } else {
            self.completed_pieces as f64 / self.total_pieces as f64
        }
    }

    pub fn remaining_pieces(&self) -> usize {
        self.total_pieces.saturating_sub(self.completed_pieces)
    }
}

impl fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} pieces ({:.1}%), {} peers",
            self.completed_pieces,
            self.total_pieces,
            self.fraction() * 100.0,
            self.active_peers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let progress = DownloadProgress { completed_pieces: 1, total_pieces: 4, ..Default::default() };
        assert_eq!(progress.fraction(), 0.25);
        assert_eq!(progress.remaining_pieces(), 3);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_empty_download_is_complete() {
        let progress = DownloadProgress::default();
        assert!(progress.is_complete());
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn test_display() {
        let progress = DownloadProgress {
            completed_pieces: 2,
            total_pieces: 4,
            active_peers: 3,
            ..Default::default()
        };
        assert_eq!(progress.to_string(), "2/4 pieces (50.0%), 3 peers");
    }
}
