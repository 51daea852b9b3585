//! Piece work queue
//!
//! A bounded multi-producer multi-consumer queue of piece indices shared by
//! every peer worker. A worker pops an index, tries it, and pushes it back if
//! the attempt did not end in a verified write. Closing the queue is the
//! shutdown signal.

use async_channel::{Receiver, Sender, TrySendError};
use tracing::{error, trace};

/// Shared queue of piece indices still to be downloaded
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: Sender<u32>,
    rx: Receiver<u32>,
}

impl WorkQueue {
    /// Queue pre-loaded with every index in `0..piece_count`
    pub fn new(piece_count: usize) -> Self {
        let (tx, rx) = async_channel::bounded(piece_count.max(1));
        for index in 0..piece_count as u32 {
            // capacity equals the piece count, so this cannot be full
            let _ = tx.try_send(index);
        }
        Self { tx, rx }
    }

    /// Wait for the next index. Returns `None` once the queue is closed,
    /// including for waiters blocked at the time of closing.
    pub async fn pop(&self) -> Option<u32> {
        let index = self.rx.recv().await.ok()?;
        if self.rx.is_closed() {
            return None;
        }
        trace!("Popped piece {}", index);
        Some(index)
    }

    /// Take the next index without waiting. Returns `None` if the queue is
    /// empty or closed.
    pub fn try_pop(&self) -> Option<u32> {
        let index = self.rx.try_recv().ok()?;
        if self.rx.is_closed() {
            return None;
        }
        Some(index)
    }

    /// Hand an index back. Returns `false` if the queue is closed.
    pub fn push(&self, index: u32) -> bool {
        match self.tx.try_send(index) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(_)) => {
                error!("Work queue full while returning piece {}", index);
                false
            }
        }
    }

    /// Close the queue and wake every waiter. Returns `true` on the first call.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of indices waiting to be claimed
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
