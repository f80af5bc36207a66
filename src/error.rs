//! Error types for the semantic search engine
//!
//! This module provides structured error types using thiserror. Every
//! variant maps to a stable status code so protocol clients can react to
//! failures without parsing messages.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Embedding requested before the model finished loading
    #[error("Embedding model is not ready. Wait for initialization to complete and retry")]
    ModelNotReady,

    /// A scheduled task exceeded its deadline; the underlying work was abandoned
    #[error("Task timed out after {timeout_ms}ms. The result is unknown, not empty")]
    TaskTimeout { timeout_ms: u64 },

    /// A persisted cache record could not be read or parsed
    #[error("Cache entry at '{path}' is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Search was invoked before the index was constructed
    #[error("Vector index is not available yet")]
    IndexUnavailable,

    /// A document path resolved outside the workspace root
    #[error("Path '{path}' is outside the workspace root")]
    PathOutsideWorkspace { path: PathBuf },

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Invalid chunking configuration: overlap {overlap} must be smaller than window {window}")]
    InvalidChunking { window: usize, overlap: usize },

    #[error("Failed to persist '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A scheduled task panicked or was dropped before settling
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl EngineError {
    /// Get a stable status code for this error type.
    ///
    /// Returned in protocol error responses for programmatic handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::ModelNotReady => "MODEL_NOT_READY",
            Self::TaskTimeout { .. } => "TASK_TIMEOUT",
            Self::CacheCorrupt { .. } => "CACHE_CORRUPT",
            Self::IndexUnavailable => "INDEX_UNAVAILABLE",
            Self::PathOutsideWorkspace { .. } => "PATH_OUTSIDE_WORKSPACE",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::InvalidChunking { .. } => "INVALID_CHUNKING",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::TaskFailed(_) => "TASK_FAILED",
        }
    }

    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ModelNotReady | Self::TaskTimeout { .. } | Self::IndexUnavailable
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::ModelNotReady => vec![
                "The model loads in the background on first start; retry in a few seconds",
                "Check the model cache directory if loading never completes",
            ],
            Self::TaskTimeout { .. } => vec![
                "Raise embedding.task_timeout_ms or embedding.query_timeout_ms",
                "A long indexing backlog delays queries only by the task currently running",
            ],
            Self::CacheCorrupt { .. } => vec![
                "The document will be re-embedded automatically",
                "Run 'semdex clear' to drop all cached vectors",
            ],
            Self::Persistence { .. } | Self::FileWrite { .. } => vec![
                "Check disk space and permissions in the index directory",
                "The in-memory index stays usable; the write is retried on the next change",
            ],
            Self::InvalidChunking { .. } => {
                vec!["Set embedding.overlap_tokens below embedding.window_tokens"]
            }
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Only UTF-8 text and markdown files are indexed",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
