//! Tracker fan-out
//!
//! Announces to every tracker concurrently and merges the returned peers,
//! keyed by IP address. Each announce is bounded by the tracker timeout so a
//! dead tracker cannot stall discovery.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::error::TorrentError;
use crate::torrent::TorrentInfo;
use super::{AnnounceRequest, AnnounceResponse, TrackerClient};

/// Concurrent announcer over a torrent's tracker list
#[derive(Debug, Clone)]
pub struct TrackerAggregator {
    urls: Vec<String>,
    request: AnnounceRequest,
    timeout: Duration,
}

impl TrackerAggregator {
    pub fn new(urls: Vec<String>, request: AnnounceRequest, timeout: Duration) -> Self {
        Self { urls, request, timeout }
    }

    pub fn from_torrent(torrent: &TorrentInfo, config: &Config) -> Self {
        Self::new(
            torrent.announce_list.clone(),
            AnnounceRequest::new(torrent, config),
            config.tracker_timeout,
        )
    }

    pub fn tracker_count(&self) -> usize {
        self.urls.len()
    }

    /// Announce to every tracker and return the merged peer set once all of
    /// them have answered or timed out.
    pub async fn announce_all(&self) -> Vec<SocketAddr> {
        let mut announces = self.spawn_announces();
        let mut peers = HashMap::new();

        while let Some(joined) = announces.join_next().await {
            if let Some(response) = unpack(joined) {
                merge_peers(&mut peers, response.peers);
            }
        }

        info!("Trackers returned {} unique peers", peers.len());
        peers.into_values().collect()
    }

    /// Announce to every tracker in the background, sending each newly seen
    /// peer as soon as its tracker answers. The channel closes when every
    /// tracker is finished; the handle yields the number of unique peers.
    pub fn stream(self) -> (mpsc::Receiver<SocketAddr>, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(256);

        let handle = tokio::spawn(async move {
            let mut announces = self.spawn_announces();
            let mut peers = HashMap::new();

            while let Some(joined) = announces.join_next().await {
                let Some(response) = unpack(joined) else {
                    continue;
                };

                for addr in merge_peers(&mut peers, response.peers) {
                    if tx.send(addr).await.is_err() {
                        debug!("Peer receiver dropped; aborting remaining announces");
                        announces.abort_all();
                        return peers.len();
                    }
                }
            }

            info!("All trackers finished with {} unique peers", peers.len());
            peers.len()
        });

        (rx, handle)
    }

    fn spawn_announces(&self) -> JoinSet<(String, Result<AnnounceResponse>)> {
        let mut announces = JoinSet::new();

        for url in &self.urls {
            let url = url.clone();
            let request = self.request.clone();
            let limit = self.timeout;

            announces.spawn(async move {
                let result = announce_one(&url, &request, limit).await;
                (url, result)
            });
        }

        debug!("Announcing to {} trackers", announces.len());
        announces
    }
}

async fn announce_one(url: &str, request: &AnnounceRequest, limit: Duration) -> Result<AnnounceResponse> {
    let mut client = TrackerClient::new(url, limit)?;

    let outcome = timeout(limit, client.announce(request)).await;
    match outcome {
        Ok(result) => result,
        Err(_) => Err(TorrentError::tracker_error_full(
            "Announce timed out",
            url,
            format!("no answer within {:?} (state: {})", limit, client.state())
        ).into()),
    }
}

fn unpack(joined: std::result::Result<(String, Result<AnnounceResponse>), tokio::task::JoinError>) -> Option<AnnounceResponse> {
    match joined {
        Ok((_, Ok(response))) => Some(response),
        Ok((url, Err(e))) => {
            warn!("Tracker {} failed: {}", url, e);
            None
        }
        Err(e) => {
            warn!("Tracker task failed: {}", e);
            None
        }
    }
}

/// Insert peers keyed by IP; a later record for the same IP replaces the
/// earlier one. Returns the peers whose IP was not seen before.
pub fn merge_peers(known: &mut HashMap<IpAddr, SocketAddr>, peers: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let mut fresh = Vec::new();
    for addr in peers {
        if known.insert(addr.ip(), addr).is_none() {
            fresh.push(addr);
        }
    }
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_merge_dedups_by_ip() {
        let mut known = HashMap::new();

        let fresh = merge_peers(&mut known, vec![addr("10.0.0.1:1"), addr("10.0.0.2:2")]);
        assert_eq!(fresh.len(), 2);

        let fresh = merge_peers(&mut known, vec![addr("10.0.0.1:9"), addr("10.0.0.3:3")]);
        assert_eq!(fresh, vec![addr("10.0.0.3:3")]);
        assert_eq!(known.len(), 3);
        assert_eq!(known[&addr("10.0.0.1:9").ip()], addr("10.0.0.1:9"));
    }

    fn request() -> AnnounceRequest {
        AnnounceRequest { info_hash: [0; 20], peer_id: [0; 20], port: 6881, left: 0 }
    }

    #[tokio::test]
    async fn test_no_trackers() {
        let aggregator = TrackerAggregator::new(vec![], request(), Duration::from_millis(100));
        assert!(aggregator.announce_all().await.is_empty());

        let (mut rx, handle) = aggregator.stream();
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_trackers_yield_nothing() {
        let aggregator = TrackerAggregator::new(
            vec!["ftp://nowhere/announce".to_string(), "garbage".to_string()],
            request(),
            Duration::from_millis(100),
        );
        assert!(aggregator.announce_all().await.is_empty());
    }
}
