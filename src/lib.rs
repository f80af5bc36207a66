//! Local, offline semantic search over a workspace's markdown and text documents.
//!
//! The [`Engine`] ties the pieces together: documents are chunked and embedded
//! through a priority [`TaskScheduler`](scheduler::TaskScheduler), vectors are
//! cached per document, and an in-memory [`VectorIndex`](index::VectorIndex)
//! answers cosine-similarity queries. A filesystem watcher keeps everything
//! current.

pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod protocol;
pub mod scheduler;
pub mod types;
pub mod walker;
pub mod watcher;

pub use cache::{CacheStore, DocumentCacheEntry};
pub use config::Settings;
pub use coordinator::{ChangeCoordinator, ChangeEvent, CoordinatorOptions};
pub use embedding::{EmbeddingBackend, EmbeddingService, FastEmbedBackend, HashingBackend};
pub use engine::{Engine, EngineStatus, SearchResult};
pub use error::{EngineError, EngineResult};
pub use index::{SharedIndex, VectorIndex};
pub use protocol::{ProtocolServer, Request, Response};
pub use scheduler::{Priority, TaskScheduler};
pub use types::{CharRange, Chunk, IndexReport, IndexingOutcome};
