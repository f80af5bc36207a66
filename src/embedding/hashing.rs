//! Deterministic feature-hashing backend.
//!
//! A symmetric bag-of-words model: every content word is hashed into one of
//! `dimension` buckets and the resulting count vector is L2-normalized. It
//! needs no model download, so it serves offline setups (`model = "hashing"`)
//! and the test suite. The tokenizer splits on whitespace; a token id is the
//! raw word's FNV-1a hash, so tokenizing leaves nothing behind.

use crate::EngineResult;
use crate::codec::normalize;
use crate::embedding::backend::{EmbedMode, EmbeddingBackend, Token, TokenCodec};

/// Model identity written into cache entries.
pub const HASHING_MODEL_ID: &str = "hashing-bow-v1";

/// Words that carry no topical signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "which", "with",
];

/// FNV-1a, stable across runs and platforms.
fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Bag-of-words embedding backend.
#[derive(Debug)]
pub struct HashingBackend {
    dimension: usize,
    model_id: String,
}

impl HashingBackend {
    /// Create a backend producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_id: format!("{HASHING_MODEL_ID}-{dimension}"),
        }
    }

    fn bucket(&self, word: &str) -> usize {
        (fnv1a(word) % self.dimension as u64) as usize
    }
}

impl Default for HashingBackend {
    fn default() -> Self {
        Self::new(384)
    }
}

/// Lowercase a raw token and strip surrounding punctuation.
fn normalize_word(raw: &str) -> Option<String> {
    let word = raw
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if word.is_empty() || STOPWORDS.contains(&word.as_str()) {
        None
    } else {
        Some(word)
    }
}

impl TokenCodec for HashingBackend {
    fn tokenize(&self, text: &str) -> EngineResult<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut start = None;
        for (offset, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (false, None) => start = Some(offset),
                (true, Some(begin)) => {
                    tokens.push(word_token(text, begin..offset));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(begin) = start {
            tokens.push(word_token(text, begin..text.len()));
        }
        Ok(tokens)
    }
}

fn word_token(text: &str, span: std::ops::Range<usize>) -> Token {
    Token {
        id: fnv1a(&text[span.clone()]) as u32,
        span,
    }
}

impl EmbeddingBackend for HashingBackend {
    fn init(&self) -> EngineResult<()> {
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn embed(&self, text: &str, _mode: EmbedMode) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0.0; self.dimension];
        for word in text.split_whitespace().filter_map(normalize_word) {
            vector[self.bucket(&word)] += 1.0;
        }
        normalize(&mut vector);
        Ok(vector)
    }

    fn uses_task_prefixes(&self) -> bool {
        false
    }
}
