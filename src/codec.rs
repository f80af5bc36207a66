//! Compact encoding of embedding vectors and content fingerprints.
//!
//! Vectors are quantized to signed 16-bit integers before base64 encoding.
//! Embeddings are L2-normalized, so every component lies in [-1, 1] and the
//! per-component error stays below `1 / 32767`. Half the size of raw `f32`.
//!
//! # Storage Format
//!
//! - Each component: `round(clamp(x, -1, 1) * 32767)` as `i16`, little-endian
//! - The packed bytes are base64 encoded with the standard alphabet

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Scale factor between the normalized float range and `i16`.
const QUANT_SCALE: f32 = 32767.0;

/// Number of bytes per quantized component.
const BYTES_PER_COMPONENT: usize = 2;

/// Length of the hex content fingerprint.
const HASH_HEX_LEN: usize = 16;

/// Errors produced while decoding persisted vectors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Payload length {0} is not a multiple of {BYTES_PER_COMPONENT}")]
    OddLength(usize),
}

/// Content fingerprint: SHA-256 truncated to 16 hex characters.
///
/// The same hash family is used for every cache record. Mixing hash
/// families would invalidate every existing entry.
#[must_use]
pub fn hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(HASH_HEX_LEN);
    hex
}

/// Quantize and encode a vector.
///
/// Components outside [-1, 1] saturate and non-finite components encode as 0.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * BYTES_PER_COMPONENT);
    for &x in vector {
        bytes.extend_from_slice(&quantize(x).to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a vector produced by [`encode_vector`].
pub fn decode_vector(encoded: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;

    if bytes.len() % BYTES_PER_COMPONENT != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_COMPONENT)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / QUANT_SCALE)
        .collect())
}

fn quantize(x: f32) -> i16 {
    if !x.is_finite() {
        return 0;
    }
    // Clamped before the cast so the value never wraps
    (x.clamp(-1.0, 1.0) * QUANT_SCALE).round() as i16
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for val in vector.iter_mut() {
            *val /= magnitude;
        }
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Serde adapter storing a `Vec<f32>` as an encoded string.
///
/// Use with `#[serde(with = "crate::codec::serde_vector")]`.
pub mod serde_vector {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(vector: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_vector(vector))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_vector(&encoded).map_err(de::Error::custom)
    }
}
