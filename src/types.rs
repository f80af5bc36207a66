//! Core value types shared across the engine.

use serde::{Deserialize, Serialize};

/// Half-open character range `[start, end)` into a frontmatter-stripped body.
///
/// Serializes as a two-element array.
pub type CharRange = (usize, usize);

/// One embedded window of a document.
///
/// Immutable once produced; a new embedding pass replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_index: usize,
    pub range: CharRange,
    /// Fingerprint of the chunk text
    pub hash: String,
    pub vector: Vec<f32>,
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingOutcome {
    /// Chunks were embedded and written to cache and index
    Embedded { chunks: usize },
    /// Cache was valid; vectors were loaded from cache into the index
    Reused { chunks: usize },
    /// Cache valid and already indexed; nothing to do
    Unchanged,
    /// The document produced no chunks; previous entries were removed
    Empty,
    /// The file no longer exists; its entries and cache were removed
    Removed,
    /// Already being processed; it runs again once the current job settles
    Deferred,
}

/// Per-batch summary reported by the change coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub embedded: usize,
    pub reused: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub deferred: usize,
    pub failed: usize,
}

impl IndexReport {
    /// Fold one document outcome into the report.
    pub fn record(&mut self, outcome: IndexingOutcome) {
        match outcome {
            IndexingOutcome::Embedded { .. } => self.embedded += 1,
            IndexingOutcome::Reused { .. } => self.reused += 1,
            IndexingOutcome::Unchanged => self.unchanged += 1,
            IndexingOutcome::Empty | IndexingOutcome::Removed => self.removed += 1,
            IndexingOutcome::Deferred => self.deferred += 1,
        }
    }

    /// Combine two reports.
    pub fn merge(&mut self, other: IndexReport) {
        self.embedded += other.embedded;
        self.reused += other.reused;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
        self.deferred += other.deferred;
        self.failed += other.failed;
    }

    /// Total number of documents touched.
    pub fn total(&self) -> usize {
        self.embedded + self.reused + self.unchanged + self.removed + self.deferred + self.failed
    }
}
