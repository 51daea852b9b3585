//! HTTP/HTTPS tracker protocol
//!
//! A single GET with the announce parameters in the query string; the body is
//! a bencoded dictionary.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_bencode::value::Value;
use tracing::{debug, info};

use crate::error::TorrentError;
use super::announce::{parse_compact_peers, AnnounceRequest, AnnounceResponse, TrackerState};

/// Bencoded body of an announce reply
#[derive(Debug, Deserialize)]
struct HttpAnnounceBody {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    interval: Option<i64>,
    peers: Option<Value>,
}

/// Client for a single `http(s)://` announce URL
#[derive(Debug)]
pub struct HttpTracker {
    client: Client,
    url: String,
    state: TrackerState,
}

impl HttpTracker {
    pub fn new(url: &url::Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TorrentError::tracker_error_full("Failed to build HTTP client", url.as_str(), e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            state: TrackerState::Idle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub async fn announce(&mut self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        let result = self.run(request).await;
        self.state = if result.is_ok() { TrackerState::Done } else { TrackerState::Failed };
        result
    }

    async fn run(&mut self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        self.state = TrackerState::Connected;
        let announce_url = build_announce_url(&self.url, request);

        self.state = TrackerState::Announcing;
        debug!("HTTP tracker announce: {}", announce_url);

        let response = self.client.get(&announce_url).send().await
            .map_err(|e| TorrentError::tracker_error_full("Request failed", &self.url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TorrentError::tracker_error_full("Unexpected HTTP status", &self.url, status.to_string()).into());
        }
        let body = response.bytes().await
            .map_err(|e| TorrentError::tracker_error_full("Failed to read body", &self.url, e.to_string()))?;

        let announce = parse_announce_body(&body)
            .map_err(|e| TorrentError::tracker_error_full("Bad announce response", &self.url, e))?;

        info!("HTTP tracker {} returned {} peers", self.url, announce.peers.len());
        Ok(announce)
    }
}

/// Append the announce query to the tracker URL. Binary fields are
/// percent-encoded byte by byte.
pub fn build_announce_url(base: &str, request: &AnnounceRequest) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        base,
        separator,
        urlencoding::encode_binary(&request.info_hash),
        urlencoding::encode_binary(&request.peer_id),
        request.port,
        request.left
    )
}

/// Decode a tracker reply. Accepts compact peers and the list-of-dicts form.
pub fn parse_announce_body(body: &[u8]) -> std::result::Result<AnnounceResponse, String> {
    let parsed: HttpAnnounceBody = serde_bencode::from_bytes(body)
        .map_err(|e| format!("invalid bencode: {}", e))?;

    if let Some(reason) = parsed.failure_reason {
        return Err(format!("tracker failure: {}", reason));
    }

    let peers = match parsed.peers {
        Some(Value::Bytes(bytes)) => parse_compact_peers(&bytes),
        Some(Value::List(entries)) => entries.iter().filter_map(dict_peer).collect(),
        Some(_) => return Err("peers has unexpected type".to_string()),
        None => Vec::new(),
    };

    Ok(AnnounceResponse {
        interval: parsed.interval.unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
        peers,
    })
}

fn dict_peer(entry: &Value) -> Option<SocketAddr> {
    let Value::Dict(dict) = entry else {
        return None;
    };

    let ip: IpAddr = match dict.get(b"ip".as_slice())? {
        Value::Bytes(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok()?,
        _ => return None,
    };
    let port = match dict.get(b"port".as_slice())? {
        Value::Int(port) => u16::try_from(*port).ok()?,
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: [0x12; 20],
            peer_id: *b"-TL0001-abcdefghijkl",
            port: 6881,
            left: 4096,
        }
    }

    #[test]
    fn test_announce_url_encoding() {
        let url = build_announce_url("http://tracker.example.com/announce", &request());

        assert!(url.starts_with("http://tracker.example.com/announce?info_hash="));
        assert!(url.contains(&format!("info_hash={}", "%12".repeat(20))));
        assert!(url.contains("peer_id=-TL0001-abcdefghijkl"));
        assert!(url.contains("&port=6881&uploaded=0&downloaded=0&left=4096&compact=1"));
    }

    #[test]
    fn test_announce_url_existing_query() {
        let url = build_announce_url("http://tracker.example.com/announce?passkey=abc", &request());
        assert!(url.starts_with("http://tracker.example.com/announce?passkey=abc&info_hash="));
    }

    #[test]
    fn test_compact_body() {
        let mut body = b"d8:intervali900e5:peers12:".to_vec();
        body.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0x1A, 0xE2]);
        body.push(b'e');

        let parsed = parse_announce_body(&body).unwrap();
        assert_eq!(parsed.interval, 900);
        assert_eq!(parsed.peers, vec![
            "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
            "10.0.0.2:6882".parse::<SocketAddr>().unwrap(),
        ]);
    }

    #[test]
    fn test_dict_peer_list_body() {
        let body = b"d8:intervali60e5:peersld2:ip9:127.0.0.14:porti6881eed2:ip3:bad4:porti1eeee";
        let parsed = parse_announce_body(body).unwrap();
        assert_eq!(parsed.peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_failure_reason() {
        let err = parse_announce_body(b"d14:failure reason9:not founde").unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_garbage_body() {
        assert!(parse_announce_body(b"<html>").is_err());
    }
}
