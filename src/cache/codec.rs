//! Value codec shared by every persistent tier.
//!
//! `encode` serializes to JSON, compresses with zstd when the payload is large
//! enough, prefixes a one-byte tag naming the compression, and base64-encodes
//! the result so it can live in a text column.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::config::CodecConfig;

const TAG_RAW: u8 = b'r';
const TAG_ZSTD: u8 = b'z';
const DIGEST_HEX_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize value: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize value: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),
    #[error("failed to decompress payload: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is empty")]
    Empty,
    #[error("unknown payload tag `{0:#04x}`")]
    UnknownTag(u8),
}

/// Output of [`Codec::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Text stored in the `data` column.
    pub data: String,
    /// Digest of the uncompressed JSON, stored in the `md5` column.
    pub digest: String,
}

impl Encoded {
    pub fn checksum(&self) -> String {
        Codec::checksum(&self.data)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Encoded, CodecError> {
        let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
        let digest = Self::digest(&json);

        let mut framed = Vec::with_capacity(json.len() + 1);
        if self.config.compress && json.len() >= self.config.compress_min_bytes {
            let compressed = zstd::encode_all(json.as_slice(), self.config.compress_level)
                .map_err(CodecError::Compress)?;
            framed.push(TAG_ZSTD);
            framed.extend_from_slice(&compressed);
        } else {
            framed.push(TAG_RAW);
            framed.extend_from_slice(&json);
        }

        Ok(Encoded {
            data: STANDARD.encode(framed),
            digest,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &str) -> Result<T, CodecError> {
        let framed = STANDARD.decode(data.trim())?;
        let (tag, payload) = framed.split_first().ok_or(CodecError::Empty)?;
        let json = match *tag {
            TAG_RAW => payload.to_vec(),
            TAG_ZSTD => zstd::decode_all(payload).map_err(CodecError::Decompress)?,
            other => return Err(CodecError::UnknownTag(other)),
        };
        serde_json::from_slice(&json).map_err(CodecError::Deserialize)
    }

    /// Integrity checksum of encoded data (SHA-256, lowercase hex).
    pub fn checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True when `checksum` was computed over `data`.
    pub fn verify(data: &str, checksum: &str) -> bool {
        !data.is_empty() && Self::checksum(data).eq_ignore_ascii_case(checksum.trim())
    }

    /// Short digest identifying a logical value independent of compression.
    pub fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let mut hex = hex::encode(hasher.finalize());
        hex.truncate(DIGEST_HEX_LEN);
        hex
    }
}
