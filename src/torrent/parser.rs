//! Torrent file parser
//!
//! Decodes `.torrent` metadata through the bencode codec and builds a
//! `TorrentInfo`. The info hash is taken over the exact byte span of the
//! `info` dictionary as it appears in the source, never over a re-encoding.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use anyhow::Result;
use serde_bencode::value::Value;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::torrent::info::{TorrentFile, TorrentInfo};

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentInfo> {
        info!("Parsing torrent file from {} bytes", data.len());
        trace!("Torrent data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root = Self::decode(data)?;
        let info_span = Self::info_span(data)?;
        debug!("Info dictionary spans bytes {}..{}", info_span.start, info_span.end);

        let info_hash = TorrentInfo::generate_info_hash(&data[info_span]);
        Self::convert_to_torrent_info(root, info_hash)
    }

    /// Parse a .torrent file from a file path
    pub fn parse_file(path: &Path) -> Result<TorrentInfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path)
            .map_err(|e| {
                error!("Failed to read torrent file '{}': {}", path.display(), e);
                TorrentError::parse_error_with_source(
                    format!("Failed to read torrent file '{}'", path.display()),
                    e.to_string(),
                )
            })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    /// Decode bencoded bytes into a nested value
    pub fn decode(data: &[u8]) -> Result<Value> {
        let value = serde_bencode::from_bytes::<Value>(data).map_err(TorrentError::from)?;
        Ok(value)
    }

    /// Encode a nested value into bencoded bytes
    pub fn encode(value: &Value) -> Result<Vec<u8>> {
        let bytes = serde_bencode::to_bytes(value).map_err(TorrentError::from)?;
        Ok(bytes)
    }

    /// Locate the raw byte span of the top-level `info` value.
    pub fn info_span(data: &[u8]) -> Result<Range<usize>> {
        if data.first() != Some(&b'd') {
            return Err(TorrentError::parse_error("Root must be a dictionary").into());
        }

        let mut idx = 1;
        while idx < data.len() && data[idx] != b'e' {
            let key_start = idx;
            idx = skip_value(data, idx)?;
            let key = string_contents(data, key_start)?;

            let value_start = idx;
            idx = skip_value(data, idx)?;

            if key == b"info" {
                if data[value_start] != b'd' {
                    return Err(TorrentError::parse_error("info must be a dictionary").into());
                }
                return Ok(value_start..idx);
            }
        }

        Err(TorrentError::parse_error("Missing info dictionary").into())
    }

    fn convert_to_torrent_info(root: Value, info_hash: [u8; 20]) -> Result<TorrentInfo> {
        let root_dict = match root {
            Value::Dict(d) => d,
            _ => return Err(TorrentError::parse_error("Root must be a dictionary").into()),
        };

        let announce_list = Self::announce_list(&root_dict);
        if announce_list.is_empty() {
            warn!("Torrent declares no trackers");
        }

        let info_dict = match root_dict.get(b"info".as_slice()) {
            Some(Value::Dict(d)) => d,
            _ => return Err(TorrentError::parse_error("Missing info dictionary").into()),
        };

        let name = get_bytes(info_dict, b"name")
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| TorrentError::parse_error("Missing name field"))?;
        validate_component(&name)?;

        let piece_length = get_int(info_dict, b"piece length")
            .ok_or_else(|| TorrentError::parse_error("Missing piece length"))?;
        if piece_length <= 0 {
            return Err(TorrentError::parse_error_with_source(
                "Piece length must be positive",
                format!("got {}", piece_length),
            ).into());
        }
        let piece_length = piece_length as u64;

        let pieces_bytes = get_bytes(info_dict, b"pieces")
            .ok_or_else(|| TorrentError::parse_error("Missing pieces field"))?;
        let pieces = TorrentInfo::parse_piece_hashes(pieces_bytes)?;

        let (total_length, files) = if let Some(length) = get_int(info_dict, b"length") {
            if length < 0 {
                return Err(TorrentError::parse_error("Negative length field").into());
            }
            (length as u64, Vec::new())
        } else if let Some(Value::List(file_list)) = info_dict.get(b"files".as_slice()) {
            let files = file_list
                .iter()
                .map(Self::parse_file_entry)
                .collect::<Result<Vec<_>>>()?;
            let total = files.iter().map(|f| f.length).sum();
            (total, files)
        } else {
            return Err(TorrentError::parse_error("Neither length nor files found in info dict").into());
        };

        let expected_pieces = total_length.div_ceil(piece_length) as usize;
        if expected_pieces != pieces.len() {
            error!("Piece count mismatch: {} hashes for {} bytes", pieces.len(), total_length);
            return Err(TorrentError::parse_error_with_source(
                "Piece count does not match total length",
                format!("expected {}, got {}", expected_pieces, pieces.len()),
            ).into());
        }

        info!("Successfully converted torrent info: {} ({} pieces)", name, pieces.len());
        Ok(TorrentInfo {
            announce_list,
            info_hash,
            piece_length,
            pieces,
            name,
            total_length,
            files,
        })
    }

    /// `announce` first, then every tier of `announce-list`, without duplicates
    fn announce_list(root: &HashMap<Vec<u8>, Value>) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();

        if let Some(bytes) = get_bytes(root, b"announce") {
            urls.push(String::from_utf8_lossy(bytes).to_string());
        }

        if let Some(Value::List(tiers)) = root.get(b"announce-list".as_slice()) {
            for tier in tiers {
                let Value::List(tier_urls) = tier else { continue };
                for url in tier_urls {
                    if let Value::Bytes(bytes) = url {
                        let url = String::from_utf8_lossy(bytes).to_string();
                        if !urls.contains(&url) {
                            urls.push(url);
                        }
                    }
                }
            }
        }

        urls
    }

    fn parse_file_entry(entry: &Value) -> Result<TorrentFile> {
        let Value::Dict(file_dict) = entry else {
            return Err(TorrentError::parse_error("File entry must be a dictionary").into());
        };

        let length = get_int(file_dict, b"length")
            .filter(|l| *l >= 0)
            .ok_or_else(|| TorrentError::parse_error("Missing file length"))? as u64;

        let path_list = match file_dict.get(b"path".as_slice()) {
            Some(Value::List(list)) if !list.is_empty() => list,
            _ => return Err(TorrentError::parse_error("Missing file path").into()),
        };

        let mut path = Vec::with_capacity(path_list.len());
        for component in path_list {
            let Value::Bytes(bytes) = component else {
                return Err(TorrentError::parse_error("Path component must be a string").into());
            };
            let component = String::from_utf8_lossy(bytes).to_string();
            validate_component(&component)?;
            path.push(component);
        }

        Ok(TorrentFile { path, length })
    }
}

fn get_bytes<'a>(dict: &'a HashMap<Vec<u8>, Value>, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key) {
        Some(Value::Bytes(b)) => Some(b),
        _ => None,
    }
}

fn get_int(dict: &HashMap<Vec<u8>, Value>, key: &[u8]) -> Option<i64> {
    match dict.get(key) {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
    {
        return Err(TorrentError::parse_error_with_source(
            "Unsafe path component",
            component.to_string(),
        ).into());
    }
    Ok(())
}

/// Contents of the byte string starting at `start`
fn string_contents(data: &[u8], start: usize) -> Result<&[u8]> {
    let colon = find_byte(data, start, b':')?;
    let length = parse_decimal(&data[start..colon])?;
    let end = colon + 1 + length;
    if end > data.len() {
        return Err(TorrentError::parse_error("Byte string exceeds input").into());
    }
    Ok(&data[colon + 1..end])
}

/// Index one past the end of the bencoded value starting at `idx`
fn skip_value(data: &[u8], idx: usize) -> Result<usize> {
    let Some(&byte) = data.get(idx) else {
        return Err(TorrentError::parse_error("Unexpected end of data").into());
    };

    match byte {
        b'i' => Ok(find_byte(data, idx + 1, b'e')? + 1),
        b'l' | b'd' => {
            let mut pos = idx + 1;
            loop {
                match data.get(pos) {
                    Some(b'e') => return Ok(pos + 1),
                    Some(_) => pos = skip_value(data, pos)?,
                    None => return Err(TorrentError::parse_error("Unterminated container").into()),
                }
            }
        }
        b'0'..=b'9' => {
            let colon = find_byte(data, idx, b':')?;
            let length = parse_decimal(&data[idx..colon])?;
            let end = colon + 1 + length;
            if end > data.len() {
                return Err(TorrentError::parse_error("Byte string exceeds input").into());
            }
            Ok(end)
        }
        other => Err(TorrentError::parse_error_with_source(
            "Unknown bencode type",
            format!("byte 0x{:02x} at {}", other, idx),
        ).into()),
    }
}

fn find_byte(data: &[u8], from: usize, needle: u8) -> Result<usize> {
    data.get(from..)
        .and_then(|rest| rest.iter().position(|&b| b == needle))
        .map(|p| from + p)
        .ok_or_else(|| TorrentError::parse_error("Unterminated bencode token").into())
}

fn parse_decimal(digits: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(digits)
        .map_err(|e| TorrentError::parse_error_with_source("Invalid length prefix", e.to_string()))?;
    let value = text
        .parse::<usize>()
        .map_err(|e| TorrentError::parse_error_with_source("Invalid length prefix", e.to_string()))?;
    Ok(value)
}
