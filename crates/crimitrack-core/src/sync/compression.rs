//! Gzip + base64 encoding of push payloads

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::error::{Error, Result};

/// Request body ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// JSON text of the body
    pub body: String,
    /// Set when `body` is a JSON string of base64(gzip(payload))
    pub compressed: bool,
    /// Size of the uncompressed JSON
    pub raw_len: usize,
}

impl EncodedPayload {
    /// Bytes actually put on the wire.
    pub fn wire_len(&self) -> usize {
        self.body.len()
    }
}

/// Compress `json` when it exceeds `threshold` bytes.
///
/// Falls back to the plain payload if compression fails.
pub fn encode_payload(json: String, threshold: usize) -> EncodedPayload {
    let raw_len = json.len();
    if raw_len <= threshold {
        return EncodedPayload {
            body: json,
            compressed: false,
            raw_len,
        };
    }

    match compress(json.as_bytes()) {
        Ok(encoded) => {
            tracing::debug!("Compressed push payload {raw_len} -> {} bytes", encoded.len());
            EncodedPayload {
                body: Value::String(encoded).to_string(),
                compressed: true,
                raw_len,
            }
        }
        Err(error) => {
            tracing::warn!("Compression failed, sending uncompressed: {error}");
            EncodedPayload {
                body: json,
                compressed: false,
                raw_len,
            }
        }
    }
}

/// base64(gzip(data))
pub fn compress(data: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(BASE64_STANDARD.encode(compressed))
}

/// Inverse of [`compress`].
pub fn decompress(encoded: &str) -> Result<Vec<u8>> {
    let compressed = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|error| Error::InvalidInput(format!("invalid base64 payload: {error}")))?;
    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}
