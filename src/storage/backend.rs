//! Storage backend abstraction
//!
//! The coordinator writes verified pieces through this trait, so the output
//! destination can be swapped (files on disk, memory in tests).

use async_trait::async_trait;
use anyhow::Result;

/// Abstract destination for downloaded bytes
///
/// Offsets are absolute positions in the torrent's concatenated content.
/// Writes for different pieces may arrive concurrently and in any order.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare the destination before the first write
    async fn initialize(&self) -> Result<()>;

    /// Write `data` starting at the absolute content offset
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush anything pending once the download is complete
    async fn complete(&self) -> Result<()>;

    /// Total bytes the destination holds
    fn total_size(&self) -> u64;
}
