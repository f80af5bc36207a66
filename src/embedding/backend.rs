//! Contract between the embedding service and a concrete model.
//!
//! Backends are synchronous and may block for a long time (model loading,
//! ONNX inference). The service moves every call onto the blocking pool.

use crate::{EngineError, EngineResult};
use std::ops::Range;

/// Which side of the asymmetric dual-encoder a text is embedded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedMode {
    /// Content being indexed
    Document,
    /// An interactive search query
    Query,
}

/// One token of a text and the byte span it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub span: Range<usize>,
}

/// Token-level access used by the chunker.
///
/// Tokenization holds no state between calls: a token carries its own span,
/// so any run of tokens decodes against the text it came from.
pub trait TokenCodec {
    /// Split `text` into tokens, without special tokens.
    fn tokenize(&self, text: &str) -> EngineResult<Vec<Token>>;

    /// Text covered by a contiguous run of tokens produced from `text`.
    fn decode<'t>(&self, text: &'t str, tokens: &[Token]) -> EngineResult<&'t str> {
        let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
            return Ok("");
        };
        text.get(first.span.start..last.span.end).ok_or_else(|| {
            EngineError::Embedding(format!(
                "token span {}..{} does not fit the text",
                first.span.start, last.span.end
            ))
        })
    }
}

/// An embedding model plus its tokenizer.
///
/// Implementations must be thread-safe. `init` must be idempotent: a second
/// call after success returns `Ok(())` without reloading anything.
pub trait EmbeddingBackend: TokenCodec + Send + Sync {
    /// Load the model. Blocking.
    fn init(&self) -> EngineResult<()>;

    /// Identity recorded in cache entries. Changing it invalidates the cache.
    fn model_id(&self) -> &str;

    /// Output dimension, known once `init` has succeeded.
    fn dimension(&self) -> Option<usize>;

    /// Embed one text. The caller has already applied any task prefix.
    fn embed(&self, text: &str, mode: EmbedMode) -> EngineResult<Vec<f32>>;

    /// Whether the model was trained with task prefixes such as
    /// `search_query: `. Symmetric models return `false` and receive raw text.
    fn uses_task_prefixes(&self) -> bool {
        true
    }
}
