//! Embedding models, chunking and the scheduled embedding service.
//!
//! Backends are blocking; [`EmbeddingService`] wraps one behind the task
//! scheduler and exposes async document and query embedding.

mod backend;
mod chunker;
mod fastembed_backend;
mod hashing;
mod service;

pub use backend::{EmbedMode, EmbeddingBackend, Token, TokenCodec};
pub use chunker::{ChunkDescriptor, Chunker, DEFAULT_OVERLAP_TOKENS, DEFAULT_WINDOW_TOKENS};
pub use fastembed_backend::{FastEmbedBackend, parse_model_name};
pub use hashing::{HASHING_MODEL_ID, HashingBackend};
pub use service::{
    DEFAULT_DOCUMENT_PREFIX, DEFAULT_QUERY_PREFIX, EmbeddedDocument, EmbeddingService,
    ServiceOptions,
};

/// Model name selecting the offline [`HashingBackend`].
pub const HASHING_MODEL_NAME: &str = "hashing";

