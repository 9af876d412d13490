//! Wasm storage key codec.
//!
//! Composed keys are byte-strings of length-prefixed segments (2-byte
//! big-endian length), with the last segment unprefixed. Keys are stored
//! and exchanged as comma-joined decimal byte strings; a prefix key keeps
//! every segment length-prefixed and carries a trailing `,`, so that a
//! plain string `starts_with` (or SQL `LIKE prefix || '%'`) is exactly a
//! byte-level prefix match at a segment boundary.

use crate::error::ComputeError;

/// One segment of a composed storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// UTF-8 string segment.
    Str(String),
    /// Unsigned integer segment, encoded as 8 bytes big-endian.
    U64(u64),
    /// Raw bytes, passed through unchanged.
    Raw(Vec<u8>),
}

impl KeySegment {
    fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::U64(n) => n.to_be_bytes().to_vec(),
            Self::Raw(b) => b.clone(),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<u64> for KeySegment {
    fn from(n: u64) -> Self {
        Self::U64(n)
    }
}

/// How to decode the trailing segment of map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKeyType {
    /// UTF-8 string.
    Str,
    /// 8-byte big-endian unsigned integer (decimal string fallback).
    U64,
    /// The comma-joined decimal byte string, verbatim.
    Raw,
}

/// Compose a full key: every segment but the last is length-prefixed.
pub fn encode_key(segments: &[KeySegment]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        let bytes = segment.bytes();
        if i + 1 < segments.len() {
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(&bytes);
    }
    out
}

/// Compose a prefix: every segment is length-prefixed, so the result is a
/// byte prefix of any full key with at least one more segment.
pub fn encode_key_prefix(segments: &[KeySegment]) -> Vec<u8> {
    let mut out = Vec::new();
    for segment in segments {
        let bytes = segment.bytes();
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&bytes);
    }
    out
}

/// Comma-joined decimal encoding of key bytes (the stored form).
pub fn key_to_db(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Stored form of a prefix: comma-joined bytes with a trailing `,`.
/// An empty prefix matches every key.
pub fn prefix_to_db(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        String::new()
    } else {
        let mut s = key_to_db(bytes);
        s.push(',');
        s
    }
}

/// Parse the stored comma-decimal form back to bytes.
pub fn db_to_key(s: &str) -> Result<Vec<u8>, ComputeError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|part| {
            part.parse::<u8>()
                .map_err(|_| ComputeError::BadInput(format!("malformed key byte '{part}'")))
        })
        .collect()
}

/// Decode the trailing segment of a full stored key under a prefix.
///
/// Returns `None` if the key does not extend the prefix.
pub fn decode_trailing(db_key: &str, db_prefix: &str, key_type: MapKeyType) -> Option<String> {
    let rest = db_key.strip_prefix(db_prefix)?;
    if rest.is_empty() {
        return None;
    }
    match key_type {
        MapKeyType::Raw => Some(rest.to_string()),
        MapKeyType::Str => {
            let bytes = db_to_key(rest).ok()?;
            String::from_utf8(bytes).ok()
        }
        MapKeyType::U64 => {
            let bytes = db_to_key(rest).ok()?;
            if bytes.len() == 8 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Some(u64::from_be_bytes(buf).to_string())
            } else {
                let s = String::from_utf8(bytes).ok()?;
                s.parse::<u64>().ok().map(|n| n.to_string())
            }
        }
    }
}
