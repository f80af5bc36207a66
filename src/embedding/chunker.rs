//! Token-window chunking with overlap.
//!
//! A document longer than the window is split into windows of `window`
//! tokens that advance by `window - overlap`. A window's text is the source
//! span from its first token to its last, and its character range is that
//! span measured in characters. Whitespace between windows belongs to no
//! window except at the document edges.

use crate::document::char_len;
use crate::embedding::backend::TokenCodec;
use crate::types::CharRange;
use crate::{EngineError, EngineResult};
use std::ops::Range;

/// Default window size in tokens.
pub const DEFAULT_WINDOW_TOKENS: usize = 512;

/// Default overlap between consecutive windows in tokens.
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;

/// A chunk before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub text: String,
    pub range: CharRange,
}

/// Splits documents into overlapping token windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    window: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW_TOKENS,
            overlap: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

impl Chunker {
    /// Create a chunker. Rejects `overlap >= window` and a zero window.
    pub fn new(window: usize, overlap: usize) -> EngineResult<Self> {
        if window == 0 || overlap >= window {
            return Err(EngineError::InvalidChunking { window, overlap });
        }
        Ok(Self { window, overlap })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.window - self.overlap
    }

    /// Token index ranges of every window for a document of `token_count` tokens.
    pub fn windows(&self, token_count: usize) -> Vec<Range<usize>> {
        if token_count == 0 {
            return Vec::new();
        }
        if token_count <= self.window {
            return vec![0..token_count];
        }

        let mut windows = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.window).min(token_count);
            windows.push(start..end);
            // Stop once a window reaches the end: no empty trailing window
            if end == token_count {
                break;
            }
            start += self.step();
        }
        windows
    }

    /// Split `text` into chunk descriptors.
    ///
    /// Empty or whitespace-only text yields no chunks; callers skip embedding.
    pub fn chunk(&self, text: &str, tokenizer: &dyn TokenCodec) -> EngineResult<Vec<ChunkDescriptor>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokens = tokenizer.tokenize(text)?;
        let text_len = char_len(text);

        if tokens.len() <= self.window {
            return Ok(vec![ChunkDescriptor {
                index: 0,
                text: text.to_string(),
                range: (0, text_len),
            }]);
        }

        let windows = self.windows(tokens.len());
        let last = windows.len() - 1;
        let mut chunks = Vec::with_capacity(windows.len());

        for (index, window) in windows.into_iter().enumerate() {
            let run = &tokens[window];
            let window_text = tokenizer.decode(text, run)?;

            // The first and last windows absorb leading and trailing whitespace
            let start = if index == 0 {
                0
            } else {
                char_offset(text, run[0].span.start)?
            };
            let end = if index == last {
                text_len
            } else {
                char_offset(text, run[run.len() - 1].span.end)?
            };

            chunks.push(ChunkDescriptor {
                index,
                text: window_text.to_string(),
                range: (start, end),
            });
        }

        Ok(chunks)
    }
}

/// Characters before byte offset `byte` of `text`.
fn char_offset(text: &str, byte: usize) -> EngineResult<usize> {
    text.get(..byte)
        .map(char_len)
        .ok_or_else(|| EngineError::Embedding(format!("token offset {byte} is not a char boundary")))
}
