//! Download coordinator
//!
//! Runs one worker per peer against a shared queue of piece indices. A
//! worker pops an index, downloads and verifies it, and either writes it out
//! or pushes the index back for any peer to pick up again.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::cli::Config;
use crate::download::{DownloadProgress, WorkQueue};
use crate::error::TorrentError;
use crate::peer::PeerSession;
use crate::storage::{piece_digest, verify_piece, StorageBackend};
use crate::torrent::TorrentInfo;

/// Overall state of a download
#[derive(Debug, Clone)]
pub enum DownloadStatus {
    Running,
    /// Every piece is verified and written
    Complete,
    /// Aborted by a fatal error
    Failed(TorrentError),
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, DownloadStatus::Running)
    }
}

/// Outcome of looking for work a peer can serve
enum Claim {
    Piece(u32),
    /// Nothing queued right now is held by the peer
    Unavailable,
    Closed,
}

/// Worker slots. Peers beyond `max_peers` wait in `pending`.
#[derive(Debug, Default)]
struct PeerSlots {
    active: usize,
    pending: VecDeque<SocketAddr>,
    known: HashSet<SocketAddr>,
}

struct Shared {
    torrent: Arc<TorrentInfo>,
    config: Arc<Config>,
    storage: Arc<dyn StorageBackend>,
    queue: WorkQueue,
    completed: RwLock<HashSet<u32>>,
    connected_peers: AtomicUsize,
    failed_attempts: AtomicUsize,
    downloaded_bytes: AtomicU64,
    slots: Mutex<PeerSlots>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    status: watch::Sender<DownloadStatus>,
}

/// Drives the download of one torrent from any number of peers
#[derive(Clone)]
pub struct DownloadCoordinator {
    shared: Arc<Shared>,
}

impl DownloadCoordinator {
    /// Prepare the output and load every piece index into the work queue.
    /// A torrent without pieces is complete immediately.
    pub async fn new(
        torrent: Arc<TorrentInfo>,
        config: Arc<Config>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        storage.initialize().await?;

        let piece_count = torrent.piece_count();
        let (status, _) = watch::channel(DownloadStatus::Running);
        let coordinator = Self {
            shared: Arc::new(Shared {
                queue: WorkQueue::new(piece_count),
                torrent,
                config,
                storage,
                completed: RwLock::new(HashSet::new()),
                connected_peers: AtomicUsize::new(0),
                failed_attempts: AtomicUsize::new(0),
                downloaded_bytes: AtomicU64::new(0),
                slots: Mutex::new(PeerSlots::default()),
                workers: Mutex::new(Vec::new()),
                status,
            }),
        };

        info!("Download coordinator ready: {} pieces", piece_count);
        if piece_count == 0 {
            coordinator.shared.finish().await;
        }

        Ok(coordinator)
    }

    /// Register a peer and start a worker for it. Returns `false` if the
    /// address is already known or the download is closed.
    pub async fn add_peer(&self, addr: SocketAddr) -> bool {
        if self.shared.queue.is_closed() {
            return false;
        }

        let mut slots = self.shared.slots.lock().await;
        if !slots.known.insert(addr) {
            trace!("Peer {} already registered", addr);
            return false;
        }

        if slots.active >= self.shared.config.max_peers {
            debug!("Peer {} queued, {} workers busy", addr, slots.active);
            slots.pending.push_back(addr);
            return true;
        }

        slots.active += 1;
        drop(slots);

        debug!("Starting worker for peer {}", addr);
        let handle = tokio::spawn(run_worker(self.shared.clone(), addr));
        self.shared.workers.lock().await.push(handle);
        true
    }

    /// Register several peers, returning how many were new
    pub async fn add_peers(&self, addrs: impl IntoIterator<Item = SocketAddr>) -> usize {
        let mut added = 0;
        for addr in addrs {
            if self.add_peer(addr).await {
                added += 1;
            }
        }
        added
    }

    /// Resolve once every piece is written, or with the error that aborted
    /// the download.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.shared.status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                DownloadStatus::Complete => return Ok(()),
                DownloadStatus::Failed(e) => return Err(e.into()),
                DownloadStatus::Running => {}
            }
            // the sender lives as long as `self`
            let _ = rx.changed().await;
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.shared.status.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.shared.status.borrow(), DownloadStatus::Complete)
    }

    pub async fn completed_pieces(&self) -> Vec<u32> {
        let mut pieces: Vec<u32> = self.shared.completed.read().await.iter().copied().collect();
        pieces.sort_unstable();
        pieces
    }

    /// Peers that completed the handshake and interest exchange so far
    pub fn connected_peers(&self) -> usize {
        self.shared.connected_peers.load(Ordering::SeqCst)
    }

    /// Workers currently running
    pub async fn active_workers(&self) -> usize {
        self.shared.slots.lock().await.active
    }

    pub async fn progress(&self) -> DownloadProgress {
        let completed_pieces = self.shared.completed.read().await.len();
        DownloadProgress {
            completed_pieces,
            total_pieces: self.shared.torrent.piece_count(),
            connected_peers: self.connected_peers(),
            active_peers: self.active_workers().await,
            failed_attempts: self.shared.failed_attempts.load(Ordering::SeqCst),
            downloaded_bytes: self.shared.downloaded_bytes.load(Ordering::SeqCst),
            total_bytes: self.shared.torrent.total_size(),
        }
    }

    /// Close the work queue. Workers exit at their next pop.
    pub fn close(&self) {
        if self.shared.queue.close() {
            debug!("Work queue closed");
        }
    }

    /// Close and wait for every worker to exit
    pub async fn shutdown(&self) {
        self.close();
        let handles: Vec<_> = self.shared.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Peer worker ended abnormally: {}", e);
            }
        }
        info!("Download coordinator shut down");
    }
}

/// Serve peers until no address is left waiting for a slot
async fn run_worker(shared: Arc<Shared>, mut addr: SocketAddr) {
    loop {
        shared.run_session(addr).await;

        let mut slots = shared.slots.lock().await;
        match slots.pending.pop_front() {
            Some(next) if !shared.queue.is_closed() => addr = next,
            _ => {
                slots.active -= 1;
                break;
            }
        }
    }
}

impl Shared {
    async fn run_session(&self, addr: SocketAddr) {
        if self.queue.is_closed() {
            return;
        }

        let mut session = match PeerSession::connect(addr, self.torrent.info_hash, &self.config).await {
            Ok(session) => session,
            Err(e) => {
                debug!("Dropping peer {}: {}", addr, e);
                return;
            }
        };

        if let Err(e) = session.announce_interested(self.torrent.piece_count()).await {
            debug!("Dropping peer {} before download: {}", addr, e);
            session.close().await;
            return;
        }

        self.connected_peers.fetch_add(1, Ordering::SeqCst);
        info!("Peer {} ready with {} pieces", addr, session.bitfield().count());

        let max_failures = self.config.max_peer_failures;
        let mut failures = 0;
        let reason = loop {
            let index = match self.claim(&session).await {
                Claim::Piece(index) => index,
                Claim::Closed => break "no more work",
                Claim::Unavailable => {
                    if !self.can_help(&session).await {
                        break "peer has no missing pieces";
                    }
                    let backoff = self.config.unavailable_backoff.mul_f64(1.0 + rand::random::<f64>());
                    trace!("Peer {} holds no queued piece, waiting {:?}", addr, backoff);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let data = match self.fetch_verified(&mut session, index).await {
                Ok(data) => data,
                Err(e) => {
                    self.failed_attempts.fetch_add(1, Ordering::SeqCst);
                    self.queue.push(index);
                    failures += 1;
                    debug!("Piece {} from {} requeued ({}/{}): {}", index, addr, failures, max_failures, e);

                    if !session.is_usable() {
                        break "connection failed";
                    }
                    if failures >= max_failures {
                        break "too many failed pieces";
                    }
                    continue;
                }
            };

            if let Err(e) = self.store_piece(index, &data).await {
                error!("Failed to write piece {}: {}", index, e);
                self.fail(e);
                break "output write failed";
            }
            failures = 0;
        };

        debug!("Worker for {} exiting: {}", addr, reason);
        session.close().await;
    }

    /// Take a queued piece the peer holds. Waits for the first index, then
    /// scans the rest of the queue without waiting. Every index passed over
    /// goes back on the queue.
    async fn claim(&self, session: &PeerSession) -> Claim {
        let Some(first) = self.queue.pop().await else {
            return Claim::Closed;
        };
        if session.has_piece(first) {
            return Claim::Piece(first);
        }

        let mut skipped = vec![first];
        let mut found = None;
        for _ in 0..self.queue.len() {
            match self.queue.try_pop() {
                Some(index) if session.has_piece(index) => {
                    found = Some(index);
                    break;
                }
                Some(index) => skipped.push(index),
                None => break,
            }
        }
        for index in skipped {
            self.queue.push(index);
        }

        match found {
            Some(index) => Claim::Piece(index),
            None if self.queue.is_closed() => Claim::Closed,
            None => Claim::Unavailable,
        }
    }

    /// Whether the peer holds any piece that is still missing
    async fn can_help(&self, session: &PeerSession) -> bool {
        let completed = self.completed.read().await;
        (0..self.torrent.piece_count() as u32)
            .any(|index| session.has_piece(index) && !completed.contains(&index))
    }

    async fn fetch_verified(&self, session: &mut PeerSession, index: u32) -> Result<Vec<u8>> {
        let data = session.request_piece(index, &self.torrent).await?;
        let expected = self.torrent.piece_hash(index as usize)
            .ok_or_else(|| TorrentError::piece_request_error("Piece index out of range", index))?;

        if !verify_piece(&data, &expected) {
            let err = TorrentError::hash_mismatch(index, &expected, &piece_digest(&data));
            warn!("Peer {}: {}", session.addr(), err);
            return Err(err.into());
        }

        trace!("Piece {} verified", index);
        Ok(data)
    }

    async fn store_piece(&self, index: u32, data: &[u8]) -> std::result::Result<(), TorrentError> {
        let offset = self.torrent.piece_offset(index as usize);
        self.storage.write_at(offset, data).await.map_err(|e| match e.downcast::<TorrentError>() {
            Ok(err) => err.with_context(format!("piece {} at offset {}", index, offset)),
            Err(e) => TorrentError::storage_error_full("Failed to write piece", self.torrent.name.clone(), e.to_string()),
        })?;

        let done = {
            let mut completed = self.completed.write().await;
            if !completed.insert(index) {
                warn!("Piece {} was already complete", index);
                return Ok(());
            }
            completed.len()
        };
        self.downloaded_bytes.fetch_add(data.len() as u64, Ordering::SeqCst);

        let total = self.torrent.piece_count();
        info!("Piece {} complete ({}/{})", index, done, total);
        if done == total {
            self.finish().await;
        }
        Ok(())
    }

    async fn finish(&self) {
        self.queue.close();
        match self.storage.complete().await {
            Ok(()) => {
                if self.set_status(DownloadStatus::Complete) {
                    info!("Download complete: {}", self.torrent.name);
                }
            }
            Err(e) => {
                error!("Failed to finalize output: {}", e);
                self.fail(TorrentError::storage_error_full("Failed to finalize output", self.torrent.name.clone(), e.to_string()));
            }
        }
    }

    fn fail(&self, err: TorrentError) {
        self.queue.close();
        self.set_status(DownloadStatus::Failed(err));
    }

    /// Only the first terminal status sticks
    fn set_status(&self, next: DownloadStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.is_finished() {
                return false;
            }
            *current = next;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records writes in memory
    #[derive(Default)]
    struct MemoryStorage {
        size: u64,
        fail_writes: bool,
        data: std::sync::Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl StorageBackend for MemoryStorage {
        async fn initialize(&self) -> Result<()> {
            *self.data.lock().unwrap() = vec![0; self.size as usize];
            Ok(())
        }

        async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(TorrentError::storage_error_full("disk full", "memory", "injected").into());
            }
            let mut buf = self.data.lock().unwrap();
            buf[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            Ok(())
        }

        async fn complete(&self) -> Result<()> {
            Ok(())
        }

        fn total_size(&self) -> u64 {
            self.size
        }
    }

    fn torrent(content: &[u8], piece_length: u64) -> TorrentInfo {
        let pieces = content.chunks(piece_length as usize).map(piece_digest).collect();
        TorrentInfo {
            announce_list: Vec::new(),
            info_hash: [7u8; 20],
            piece_length,
            pieces,
            name: "memory".to_string(),
            total_length: content.len() as u64,
            files: Vec::new(),
        }
    }

    async fn coordinator(content: &[u8], fail_writes: bool) -> (DownloadCoordinator, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage { size: content.len() as u64, fail_writes, ..Default::default() });
        let coordinator = DownloadCoordinator::new(
            Arc::new(torrent(content, 4)),
            Arc::new(Config::default()),
            storage.clone(),
        )
        .await
        .unwrap();
        (coordinator, storage)
    }

    #[tokio::test]
    async fn test_empty_torrent_completes_immediately() {
        let (coordinator, _) = coordinator(b"", false).await;
        assert!(coordinator.is_complete());
        coordinator.wait().await.unwrap();
        assert!(!coordinator.add_peer("127.0.0.1:1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_store_piece_completes_once() {
        let content = b"abcdefgh";
        let (coordinator, storage) = coordinator(content, false).await;
        let shared = &coordinator.shared;

        shared.store_piece(1, b"efgh").await.unwrap();
        shared.store_piece(1, b"efgh").await.unwrap();
        assert_eq!(coordinator.completed_pieces().await, vec![1]);
        assert!(!coordinator.is_complete());

        shared.store_piece(0, b"abcd").await.unwrap();
        coordinator.wait().await.unwrap();

        let progress = coordinator.progress().await;
        assert_eq!(progress.completed_pieces, 2);
        assert_eq!(progress.downloaded_bytes, 8);
        assert_eq!(&*storage.data.lock().unwrap(), content);
        assert!(shared.queue.is_closed());
    }

    #[tokio::test]
    async fn test_write_failure_fails_download() {
        let (coordinator, _) = coordinator(b"abcdefgh", true).await;
        let err = coordinator.shared.store_piece(0, b"abcd").await.unwrap_err();
        coordinator.shared.fail(err);

        let result = tokio::time::timeout(Duration::from_secs(1), coordinator.wait()).await.unwrap();
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<TorrentError>().unwrap().is_fatal());
        assert!(!coordinator.is_complete());
        assert!(coordinator.completed_pieces().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_peer_rejected() {
        let (coordinator, _) = coordinator(b"abcdefgh", false).await;
        // nothing listens on port 1, so the worker drops the peer
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        assert!(coordinator.add_peer(addr).await);
        assert!(!coordinator.add_peer(addr).await);

        coordinator.shutdown().await;
        assert_eq!(coordinator.active_workers().await, 0);
        assert_eq!(coordinator.connected_peers(), 0);
        assert!(!coordinator.add_peer("127.0.0.1:2".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_no_peers_makes_no_progress() {
        let (coordinator, _) = coordinator(b"abcdefgh", false).await;
        let waited = tokio::time::timeout(Duration::from_millis(100), coordinator.wait()).await;
        assert!(waited.is_err());
        assert_eq!(coordinator.progress().await.completed_pieces, 0);
    }
}
