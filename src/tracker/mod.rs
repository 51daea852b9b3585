//! Tracker module
//!
//! Peer discovery through UDP and HTTP/HTTPS trackers.

pub mod aggregator;
pub mod announce;
pub mod http;
pub mod udp;

use std::time::Duration;

use anyhow::Result;

use crate::error::TorrentError;

pub use aggregator::TrackerAggregator;
pub use announce::{parse_compact_peers, AnnounceRequest, AnnounceResponse, TrackerState};
pub use http::HttpTracker;
pub use udp::UdpTracker;

/// A tracker client for one announce URL, chosen by scheme
#[derive(Debug)]
pub enum TrackerClient {
    Udp(UdpTracker),
    Http(HttpTracker),
}

impl TrackerClient {
    pub fn new(announce_url: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(announce_url)
            .map_err(|e| TorrentError::tracker_error_full("Invalid announce URL", announce_url, e.to_string()))?;

        match url.scheme() {
            "udp" => Ok(TrackerClient::Udp(UdpTracker::new(&url, timeout)?)),
            "http" | "https" => Ok(TrackerClient::Http(HttpTracker::new(&url, timeout)?)),
            other => Err(TorrentError::tracker_error_full(
                "Unsupported tracker scheme",
                announce_url,
                other.to_string()
            ).into()),
        }
    }

    pub async fn announce(&mut self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        match self {
            TrackerClient::Udp(tracker) => tracker.announce(request).await,
            TrackerClient::Http(tracker) => tracker.announce(request).await,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            TrackerClient::Udp(tracker) => tracker.url(),
            TrackerClient::Http(tracker) => tracker.url(),
        }
    }

    pub fn state(&self) -> TrackerState {
        match self {
            TrackerClient::Udp(tracker) => tracker.state(),
            TrackerClient::Http(tracker) => tracker.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_by_scheme() {
        let timeout = Duration::from_secs(1);

        assert!(matches!(
            TrackerClient::new("udp://tracker.example.com:6969/announce", timeout).unwrap(),
            TrackerClient::Udp(_)
        ));
        assert!(matches!(
            TrackerClient::new("http://tracker.example.com/announce", timeout).unwrap(),
            TrackerClient::Http(_)
        ));
        assert!(matches!(
            TrackerClient::new("https://tracker.example.com/announce", timeout).unwrap(),
            TrackerClient::Http(_)
        ));
    }

    #[test]
    fn test_unknown_scheme() {
        let err = TrackerClient::new("wss://tracker.example.com/announce", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::TrackerError { .. })
        ));
        assert!(TrackerClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
