//! Async embedding service over a blocking backend.
//!
//! Every model call (tokenization included) is routed through the
//! [`TaskScheduler`] so the model is never used by two callers at once and
//! queries overtake queued indexing work.

use crate::codec::{self, normalize};
use crate::document::strip_frontmatter;
use crate::embedding::backend::{EmbedMode, EmbeddingBackend};
use crate::embedding::chunker::{ChunkDescriptor, Chunker};
use crate::scheduler::{Priority, TaskScheduler};
use crate::types::Chunk;
use crate::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Prefix conventions for asymmetric dual-encoder models.
pub const DEFAULT_DOCUMENT_PREFIX: &str = "search_document: ";
pub const DEFAULT_QUERY_PREFIX: &str = "search_query: ";

/// Tunables for [`EmbeddingService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub chunker: Chunker,
    pub document_prefix: String,
    pub query_prefix: String,
    /// Deadline for indexing tasks
    pub task_timeout: Duration,
    /// Deadline for interactive query embedding
    pub query_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            chunker: Chunker::default(),
            document_prefix: DEFAULT_DOCUMENT_PREFIX.to_string(),
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
            task_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// A document's chunks plus the fingerprint used for cache validity.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDocument {
    pub content_hash: String,
    pub chunks: Vec<Chunk>,
}

/// Embedding front-end shared by the coordinator and the query path.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    scheduler: TaskScheduler,
    options: ServiceOptions,
    /// Output dimension, set once initialization succeeds
    ready: OnceCell<usize>,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model_id", &self.backend.model_id())
            .field("ready", &self.ready.get().is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl EmbeddingService {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        scheduler: TaskScheduler,
        options: ServiceOptions,
    ) -> Self {
        Self {
            backend,
            scheduler,
            options,
            ready: OnceCell::new(),
        }
    }

    /// Load the model.
    ///
    /// Idempotent. Concurrent callers all await the same load; the model is
    /// loaded once. A failed load can be retried.
    pub async fn init(&self) -> EngineResult<()> {
        let dimension = self
            .ready
            .get_or_try_init(|| async {
                let backend = Arc::clone(&self.backend);
                info!(model = backend.model_id(), "initializing embedding model");
                tokio::task::spawn_blocking(move || {
                    backend.init()?;
                    backend.dimension().ok_or_else(|| {
                        EngineError::Embedding("model reported no dimension after init".into())
                    })
                })
                .await
                .map_err(|e| EngineError::TaskFailed(e.to_string()))?
            })
            .await?;
        debug!(dimension = *dimension, "embedding model initialized");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Output dimension, `None` until initialized.
    pub fn dimension(&self) -> Option<usize> {
        self.ready.get().copied()
    }

    /// Identity recorded in cache entries.
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    fn ensure_ready(&self) -> EngineResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(EngineError::ModelNotReady)
        }
    }

    fn prefixed(&self, text: &str, mode: EmbedMode) -> String {
        if !self.backend.uses_task_prefixes() {
            return text.to_string();
        }
        let prefix = match mode {
            EmbedMode::Document => &self.options.document_prefix,
            EmbedMode::Query => &self.options.query_prefix,
        };
        format!("{prefix}{text}")
    }

    async fn embed(
        &self,
        text: &str,
        mode: EmbedMode,
        priority: Priority,
        timeout: Duration,
    ) -> EngineResult<Vec<f32>> {
        self.ensure_ready()?;
        let input = self.prefixed(text, mode);
        let backend = Arc::clone(&self.backend);

        self.scheduler
            .submit(priority, timeout, async move {
                let mut vector = tokio::task::spawn_blocking(move || backend.embed(&input, mode))
                    .await
                    .map_err(|e| EngineError::TaskFailed(e.to_string()))??;
                normalize(&mut vector);
                Ok(vector)
            })
            .await
    }

    /// Embed indexed content (document prefix, normal priority, L2-normalized).
    pub async fn embed_document(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.embed(
            text,
            EmbedMode::Document,
            Priority::Normal,
            self.options.task_timeout,
        )
        .await
    }

    /// Embed a search query (query prefix, high priority, L2-normalized).
    pub async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.embed(
            text,
            EmbedMode::Query,
            Priority::High,
            self.options.query_timeout,
        )
        .await
    }

    /// Split a body into chunks using the model's tokenizer.
    async fn chunk(&self, body: String) -> EngineResult<Vec<ChunkDescriptor>> {
        let backend = Arc::clone(&self.backend);
        let chunker = self.options.chunker;

        self.scheduler
            .submit(Priority::Normal, self.options.task_timeout, async move {
                tokio::task::spawn_blocking(move || chunker.chunk(&body, backend.as_ref()))
                    .await
                    .map_err(|e| EngineError::TaskFailed(e.to_string()))?
            })
            .await
    }

    /// Chunk and embed a whole document.
    ///
    /// Frontmatter is stripped before chunking, so chunk ranges index the
    /// body. When `title` is given it is prepended to every chunk's text
    /// before embedding. The content hash covers the raw content.
    pub async fn embed_document_chunks(
        &self,
        path: &str,
        content: &str,
        title: Option<&str>,
    ) -> EngineResult<EmbeddedDocument> {
        self.ensure_ready()?;
        let content_hash = codec::hash(content);
        let body = strip_frontmatter(content).to_string();

        let descriptors = self.chunk(body).await?;
        debug!(path, chunks = descriptors.len(), "document chunked");

        let mut chunks = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let input = match title {
                Some(title) => format!("{title}\n\n{}", descriptor.text),
                None => descriptor.text.clone(),
            };
            // One task per chunk so queries can slip in between
            let vector = self.embed_document(&input).await?;
            chunks.push(Chunk {
                chunk_index: descriptor.index,
                range: descriptor.range,
                hash: codec::hash(&descriptor.text),
                vector,
            });
        }

        Ok(EmbeddedDocument {
            content_hash,
            chunks,
        })
    }
}
