//! File storage module
//!
//! Maps absolute content offsets onto the torrent's output files. Multi-file
//! torrents are written under `<output_dir>/<name>/`, single-file torrents to
//! `<output_dir>/<name>`.

use std::ops::Range;
use std::path::{Path, PathBuf};
use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, trace};

use crate::error::TorrentError;
use crate::storage::backend::StorageBackend;
use crate::torrent::TorrentInfo;

/// An output file and where it sits in the concatenated content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Absolute content offset of the file's first byte
    pub offset: u64,
    pub length: u64,
}

impl FileEntry {
    fn end(&self) -> u64 {
        self.offset + self.length
    }

    fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

/// One positional write produced by mapping a content range onto files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSpan {
    /// Index into the file list
    pub file: usize,
    /// Position within that file
    pub file_offset: u64,
    /// Slice of the incoming buffer to write
    pub data: Range<usize>,
}

/// Split `[offset, offset + len)` into per-file writes. The range is placed
/// in the file that contains `offset`; whatever does not fit continues at the
/// next file's start.
pub fn map_range(files: &[FileEntry], offset: u64, len: usize) -> Result<Vec<WriteSpan>> {
    let mut spans = Vec::new();
    map_from(files, offset, 0, len, &mut spans)?;
    Ok(spans)
}

fn map_from(files: &[FileEntry], offset: u64, data_pos: usize, remaining: usize, spans: &mut Vec<WriteSpan>) -> Result<()> {
    if remaining == 0 {
        return Ok(());
    }

    let Some(index) = files.iter().position(|f| f.contains(offset)) else {
        return Err(TorrentError::StorageError {
            message: "Write past end of content".to_string(),
            path: None,
            source: Some(format!("offset {} with {} bytes left", offset, remaining)),
        }.into());
    };

    let file = &files[index];
    let file_offset = offset - file.offset;
    let take = std::cmp::min(remaining as u64, file.length - file_offset) as usize;

    spans.push(WriteSpan {
        file: index,
        file_offset,
        data: data_pos..data_pos + take,
    });

    map_from(files, file.end(), data_pos + take, remaining - take, spans)
}

/// File storage for torrent data
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// Directory the output files are created under
    base_path: PathBuf,
    files: Vec<FileEntry>,
    total_size: u64,
}

impl FileStorage {
    /// Lay out the torrent's files under `output_dir`
    pub fn new(output_dir: &Path, torrent: &TorrentInfo) -> Self {
        let base_path = if torrent.is_multi_file() {
            output_dir.join(&torrent.name)
        } else {
            output_dir.to_path_buf()
        };

        let mut offset = 0;
        let files = torrent.output_files()
            .into_iter()
            .map(|file| {
                let entry = FileEntry {
                    path: file.path.iter().collect(),
                    offset,
                    length: file.length,
                };
                offset += file.length;
                entry
            })
            .collect();

        Self {
            base_path,
            files,
            total_size: torrent.total_size(),
        }
    }

    /// Build storage over an explicit layout
    pub fn with_files(base_path: PathBuf, files: &[(PathBuf, u64)]) -> Self {
        let mut offset = 0;
        let files: Vec<FileEntry> = files
            .iter()
            .map(|(path, length)| {
                let entry = FileEntry { path: path.clone(), offset, length: *length };
                offset += length;
                entry
            })
            .collect();

        Self {
            base_path,
            files,
            total_size: offset,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Absolute path of a file entry
    pub fn file_path(&self, entry: &FileEntry) -> PathBuf {
        self.base_path.join(&entry.path)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await
                    .map_err(|e| {
                        error!("Failed to create directory '{}': {}", parent.display(), e);
                        TorrentError::storage_error_full("Failed to create directory", parent.display().to_string(), e.to_string())
                    })?;
            }
        }
        Ok(())
    }

    async fn write_span(&self, entry: &FileEntry, file_offset: u64, data: &[u8]) -> Result<()> {
        let file_path = self.file_path(entry);
        trace!("Writing {} bytes to {} at offset {}", data.len(), file_path.display(), file_offset);
        Self::ensure_parent(&file_path).await?;

        let mut file_handle = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&file_path)
            .await
            .map_err(|e| {
                error!("Failed to open file '{}': {}", file_path.display(), e);
                TorrentError::storage_error_full("Failed to open file for writing", file_path.display().to_string(), e.to_string())
            })?;

        file_handle.seek(std::io::SeekFrom::Start(file_offset)).await
            .map_err(|e| {
                error!("Failed to seek in file '{}': {}", file_path.display(), e);
                TorrentError::storage_error_full("Failed to seek in file", file_path.display().to_string(), e.to_string())
            })?;
        file_handle.write_all(data).await
            .map_err(|e| {
                error!("Failed to write to file '{}': {}", file_path.display(), e);
                TorrentError::storage_error_full("Failed to write to file", file_path.display().to_string(), e.to_string())
            })?;
        file_handle.flush().await
            .map_err(|e| {
                error!("Failed to flush file '{}': {}", file_path.display(), e);
                TorrentError::storage_error_full("Failed to flush file", file_path.display().to_string(), e.to_string())
            })?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    /// Create every output file at its declared length
    async fn initialize(&self) -> Result<()> {
        info!("Creating {} output file(s) under {}", self.files.len(), self.base_path.display());

        for entry in &self.files {
            let file_path = self.file_path(entry);
            debug!("Creating file: {} ({} bytes)", file_path.display(), entry.length);
            Self::ensure_parent(&file_path).await?;

            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&file_path)
                .await
                .map_err(|e| {
                    error!("Failed to create file '{}': {}", file_path.display(), e);
                    TorrentError::storage_error_full("Failed to create file", file_path.display().to_string(), e.to_string())
                })?;
            file.set_len(entry.length).await
                .map_err(|e| {
                    error!("Failed to set file length for '{}': {}", file_path.display(), e);
                    TorrentError::storage_error_full("Failed to set file length", file_path.display().to_string(), e.to_string())
                })?;
        }

        Ok(())
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let spans = map_range(&self.files, offset, data.len())?;
        for span in spans {
            let entry = &self.files[span.file];
            self.write_span(entry, span.file_offset, &data[span.data]).await?;
        }
        trace!("Wrote {} bytes at content offset {}", data.len(), offset);
        Ok(())
    }

    async fn complete(&self) -> Result<()> {
        info!("All data written under {}", self.base_path.display());
        Ok(())
    }

    fn total_size(&self) -> u64 {
        self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentFile;

    fn abc() -> Vec<FileEntry> {
        vec![
            FileEntry { path: PathBuf::from("a"), offset: 0, length: 10 },
            FileEntry { path: PathBuf::from("b"), offset: 10, length: 10 },
            FileEntry { path: PathBuf::from("c"), offset: 20, length: 10 },
        ]
    }

    #[test]
    fn test_map_straddling_block() {
        let spans = map_range(&abc(), 5, 15).unwrap();
        assert_eq!(spans, vec![
            WriteSpan { file: 0, file_offset: 5, data: 0..5 },
            WriteSpan { file: 1, file_offset: 0, data: 5..15 },
        ]);
    }

    #[test]
    fn test_map_inside_one_file() {
        let spans = map_range(&abc(), 22, 3).unwrap();
        assert_eq!(spans, vec![WriteSpan { file: 2, file_offset: 2, data: 0..3 }]);
    }

    #[test]
    fn test_map_across_three_files() {
        let spans = map_range(&abc(), 0, 30).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2], WriteSpan { file: 2, file_offset: 0, data: 20..30 });
    }

    #[test]
    fn test_map_skips_empty_files() {
        let files = vec![
            FileEntry { path: PathBuf::from("a"), offset: 0, length: 4 },
            FileEntry { path: PathBuf::from("empty"), offset: 4, length: 0 },
            FileEntry { path: PathBuf::from("b"), offset: 4, length: 4 },
        ];
        let spans = map_range(&files, 2, 4).unwrap();
        assert_eq!(spans[1].file, 2);
    }

    #[test]
    fn test_map_past_end() {
        assert!(map_range(&abc(), 25, 10).is_err());
        assert!(map_range(&abc(), 30, 1).is_err());
        assert!(map_range(&abc(), 30, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_straddling_block_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::with_files(dir.path().to_path_buf(), &[
            (PathBuf::from("a"), 10),
            (PathBuf::from("sub/b"), 10),
            (PathBuf::from("c"), 10),
        ]);

        storage.initialize().await.unwrap();
        let block: Vec<u8> = (1..=15).collect();
        storage.write_at(5, &block).await.unwrap();

        let a = std::fs::read(dir.path().join("a")).unwrap();
        let b = std::fs::read(dir.path().join("sub/b")).unwrap();
        let c = std::fs::read(dir.path().join("c")).unwrap();
        assert_eq!(&a[..5], &[0u8; 5]);
        assert_eq!(&a[5..], &[1, 2, 3, 4, 5]);
        assert_eq!(b, vec![6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(c, vec![0u8; 10]);
    }

    fn torrent(files: Vec<TorrentFile>) -> TorrentInfo {
        let total_length = if files.is_empty() { 8 } else { files.iter().map(|f| f.length).sum() };
        TorrentInfo {
            announce_list: vec![],
            info_hash: [0u8; 20],
            piece_length: 8,
            pieces: vec![[0u8; 20]],
            name: "name".to_string(),
            total_length,
            files,
        }
    }

    #[test]
    fn test_layout_single_file() {
        let storage = FileStorage::new(Path::new("/out"), &torrent(vec![]));
        assert_eq!(storage.files().len(), 1);
        assert_eq!(storage.file_path(&storage.files()[0]), PathBuf::from("/out/name"));
        assert_eq!(storage.total_size(), 8);
    }

    #[test]
    fn test_layout_multi_file() {
        let storage = FileStorage::new(Path::new("/out"), &torrent(vec![
            TorrentFile { path: vec!["x".to_string()], length: 3 },
            TorrentFile { path: vec!["dir".to_string(), "y".to_string()], length: 5 },
        ]));

        let files = storage.files();
        assert_eq!(storage.file_path(&files[0]), PathBuf::from("/out/name/x"));
        assert_eq!(storage.file_path(&files[1]), PathBuf::from("/out/name/dir/y"));
        assert_eq!(files[1].offset, 3);
        assert_eq!(storage.total_size(), 8);
    }

    #[tokio::test]
    async fn test_initialize_sizes_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), &torrent(vec![
            TorrentFile { path: vec!["x".to_string()], length: 3 },
            TorrentFile { path: vec!["dir".to_string(), "y".to_string()], length: 5 },
        ]));

        storage.initialize().await.unwrap();
        assert_eq!(std::fs::metadata(dir.path().join("name/x")).unwrap().len(), 3);
        assert_eq!(std::fs::metadata(dir.path().join("name/dir/y")).unwrap().len(), 5);
    }
}
