//! In-memory vector index over document chunks.
//!
//! Entries are keyed by `"{path}:{chunk_index}"`. Alongside the entry map the
//! index keeps the set of indexed paths and a path to chunk-id map, so
//! removing a document touches only its own entries.

mod persister;
mod snapshot;

pub use persister::DebouncedPersister;
pub use snapshot::{IndexSnapshot, SNAPSHOT_FILE, SNAPSHOT_VERSION, restore as restore_snapshot};

use crate::codec::cosine_similarity;
use crate::types::{CharRange, Chunk};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Index shared between the coordinator, the persister and the query path.
///
/// Never hold the lock across an `.await`.
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

/// One chunk in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub id: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub range: CharRange,
    #[serde(with = "crate::codec::serde_vector")]
    pub vector: Vec<f32>,
}

impl IndexedEntry {
    pub fn from_chunk(source_path: &str, chunk: &Chunk) -> Self {
        Self {
            id: entry_id(source_path, chunk.chunk_index),
            source_path: source_path.to_string(),
            chunk_index: chunk.chunk_index,
            range: chunk.range,
            vector: chunk.vector.clone(),
        }
    }
}

/// Identifier of a chunk entry.
pub fn entry_id(source_path: &str, chunk_index: usize) -> String {
    format!("{source_path}:{chunk_index}")
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub entry: IndexedEntry,
}

#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: HashMap<String, IndexedEntry>,
    indexed_files: BTreeSet<String>,
    file_chunk_ids: HashMap<String, Vec<String>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh index for sharing.
    pub fn shared(self) -> SharedIndex {
        Arc::new(RwLock::new(self))
    }

    /// Upsert entries. An existing entry with the same id is replaced.
    pub fn insert(&mut self, entries: impl IntoIterator<Item = IndexedEntry>) {
        for entry in entries {
            self.remove_id(&entry.id);
            self.indexed_files.insert(entry.source_path.clone());
            self.file_chunk_ids
                .entry(entry.source_path.clone())
                .or_default()
                .push(entry.id.clone());
            self.entries.insert(entry.id.clone(), entry);
        }
    }

    /// Insert every chunk of a document.
    pub fn insert_document(&mut self, source_path: &str, chunks: &[Chunk]) {
        self.insert(
            chunks
                .iter()
                .map(|chunk| IndexedEntry::from_chunk(source_path, chunk)),
        );
    }

    fn remove_id(&mut self, id: &str) {
        let Some(old) = self.entries.remove(id) else {
            return;
        };
        if let Some(ids) = self.file_chunk_ids.get_mut(&old.source_path) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.file_chunk_ids.remove(&old.source_path);
                self.indexed_files.remove(&old.source_path);
            }
        }
    }

    /// Remove every entry of a document. Returns the number removed.
    pub fn remove_by_path(&mut self, source_path: &str) -> usize {
        self.indexed_files.remove(source_path);
        let Some(ids) = self.file_chunk_ids.remove(source_path) else {
            return 0;
        };
        let mut removed = 0;
        for id in ids {
            if self.entries.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Nearest chunks to `query` by cosine similarity.
    ///
    /// Only hits scoring at least `floor` are returned, best first, at most
    /// `limit`. With a `path_prefix` only documents under it are considered;
    /// the prefix matches whole path components, so `notes` covers
    /// `notes/a.md` but not `notes-old/a.md`.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        floor: f32,
        path_prefix: Option<&str>,
    ) -> Vec<SearchHit> {
        if limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .values()
            .filter(|entry| path_prefix.is_none_or(|prefix| is_under(&entry.source_path, prefix)))
            .filter_map(|entry| {
                let score = cosine_similarity(query, &entry.vector);
                (score >= floor).then(|| SearchHit {
                    id: entry.id.clone(),
                    score,
                    entry: entry.clone(),
                })
            })
            .collect();

        // Ties broken by id so results are stable
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.indexed_files.clear();
        self.file_chunk_ids.clear();
    }

    /// Number of chunk entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_indexed(&self, source_path: &str) -> bool {
        self.indexed_files.contains(source_path)
    }

    /// Indexed document paths in sorted order.
    pub fn indexed_paths(&self) -> Vec<String> {
        self.indexed_files.iter().cloned().collect()
    }

    pub fn file_count(&self) -> usize {
        self.indexed_files.len()
    }

    /// Chunk ids of a document in insertion order.
    pub fn chunk_ids(&self, source_path: &str) -> &[String] {
        self.file_chunk_ids
            .get(source_path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<&IndexedEntry> {
        self.entries.get(id)
    }

    /// Vector dimension of the stored entries, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.values().next().map(|entry| entry.vector.len())
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &IndexedEntry> {
        self.entries.values()
    }

    pub(crate) fn file_chunk_map(&self) -> &HashMap<String, Vec<String>> {
        &self.file_chunk_ids
    }
}

/// Whether workspace-relative `path` is `prefix` or lies below it.
fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
