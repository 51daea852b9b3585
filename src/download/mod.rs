//! Download module
//!
//! The piece work queue, the coordinator that runs peer workers against it,
//! and progress snapshots.

pub mod coordinator;
pub mod progress;
pub mod queue;

pub use coordinator::{DownloadCoordinator, DownloadStatus};
pub use progress::DownloadProgress;
pub use queue::WorkQueue;
