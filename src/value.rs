//! Cached value representation and the tagged wire codec (`§3`/`§4.B`).
//!
//! Every value handed to the cache manager is either arbitrary JSON or an
//! opaque binary blob. On the wire, a value is a single byte string whose
//! first byte is a format tag:
//!
//! - `J` JSON, uncompressed
//! - `Z` JSON, zlib-compressed
//! - `P` binary (bincode), uncompressed
//! - `z` binary (bincode), zlib-compressed
//!
//! Untagged legacy payloads are treated as an opaque UTF-8 string for
//! backward read compatibility; they are never produced by this crate.

use crate::error::CacheError;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

const TAG_JSON: u8 = b'J';
const TAG_JSON_COMPRESSED: u8 = b'Z';
const TAG_BINARY: u8 = b'P';
const TAG_BINARY_COMPRESSED: u8 = b'z';

/// The sum type cached values are represented as at the codec boundary.
///
/// Callers hand in arbitrary `serde_json::Value`s for the common case;
/// values that fail JSON encoding (not expected in practice, since
/// `serde_json::Value` always encodes, but kept for symmetry with the
/// pluggable-serializer design) fall back to `Binary`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl Value {
    /// Caching an explicit JSON `null` is forbidden (`§9` open question,
    /// resolved): absence and stored-null must never be ambiguous.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Json(serde_json::Value::Null))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// Compression policy applied uniformly by the codec.
#[derive(Debug, Clone, Copy)]
pub struct CompressionPolicy {
    pub enabled: bool,
    pub threshold_bytes: usize,
}

impl CompressionPolicy {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            threshold_bytes: usize::MAX,
        }
    }
}

/// Encode a [`Value`] into the tagged on-wire representation.
///
/// Follows the three-step decision in `§4.B`: try JSON, fall back to
/// bincode, then compress only when strictly beneficial.
pub fn encode(value: &Value, policy: CompressionPolicy) -> Result<Vec<u8>, CacheError> {
    match value {
        Value::Json(json) => {
            let plain = serde_json::to_vec(json).map_err(|e| CacheError::DecodeFail {
                key: String::new(),
                reason: format!("json encode failed: {e}"),
            })?;
            Ok(maybe_compress(plain, TAG_JSON, TAG_JSON_COMPRESSED, policy))
        }
        Value::Binary(bytes) => {
            let plain = bincode::serialize(bytes).map_err(|e| CacheError::DecodeFail {
                key: String::new(),
                reason: format!("binary encode failed: {e}"),
            })?;
            Ok(maybe_compress(
                plain,
                TAG_BINARY,
                TAG_BINARY_COMPRESSED,
                policy,
            ))
        }
    }
}

fn maybe_compress(plain: Vec<u8>, plain_tag: u8, compressed_tag: u8, policy: CompressionPolicy) -> Vec<u8> {
    if policy.enabled && plain.len() > policy.threshold_bytes {
        if let Some(compressed) = zlib_compress(&plain) {
            if compressed.len() < plain.len() {
                let mut out = Vec::with_capacity(compressed.len() + 1);
                out.push(compressed_tag);
                out.extend_from_slice(&compressed);
                return out;
            }
        }
    }
    let mut out = Vec::with_capacity(plain.len() + 1);
    out.push(plain_tag);
    out.extend_from_slice(&plain);
    out
}

fn zlib_compress(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::new(6));
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).ok()?;
    Some(out)
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decode a tagged on-wire payload back into a [`Value`].
///
/// Dispatches on the first byte; an unknown tag is a [`CacheError::DecodeFail`].
/// Untagged legacy bytes are accepted as an opaque UTF-8 string, per `§3`.
pub fn decode(data: &[u8]) -> Result<Value, CacheError> {
    let Some((&tag, content)) = data.split_first() else {
        return Ok(Value::Json(serde_json::Value::String(String::new())));
    };

    match tag {
        TAG_JSON => decode_json(content),
        TAG_JSON_COMPRESSED => {
            let plain = zlib_decompress(content).map_err(|e| CacheError::DecodeFail {
                key: String::new(),
                reason: format!("zlib decompress failed: {e}"),
            })?;
            decode_json(&plain)
        }
        TAG_BINARY => decode_binary(content),
        TAG_BINARY_COMPRESSED => {
            let plain = zlib_decompress(content).map_err(|e| CacheError::DecodeFail {
                key: String::new(),
                reason: format!("zlib decompress failed: {e}"),
            })?;
            decode_binary(&plain)
        }
        _ => {
            // Legacy, unprefixed payload: treat the whole thing as an
            // opaque UTF-8 string rather than failing the read.
            match std::str::from_utf8(data) {
                Ok(s) => Ok(Value::Json(serde_json::Value::String(s.to_string()))),
                Err(_) => Err(CacheError::DecodeFail {
                    key: String::new(),
                    reason: format!("unknown tag byte {tag:#x}"),
                }),
            }
        }
    }
}

fn decode_json(content: &[u8]) -> Result<Value, CacheError> {
    serde_json::from_slice(content)
        .map(Value::Json)
        .map_err(|e| CacheError::DecodeFail {
            key: String::new(),
            reason: format!("json decode failed: {e}"),
        })
}

fn decode_binary(content: &[u8]) -> Result<Value, CacheError> {
    bincode::deserialize(content)
        .map(Value::Binary)
        .map_err(|e| CacheError::DecodeFail {
            key: String::new(),
            reason: format!("binary decode failed: {e}"),
        })
}
