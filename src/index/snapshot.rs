//! Single-file index snapshot.
//!
//! # File Format
//!
//! `<index_dir>/index.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "model": "<model id>",
//!   "dim": 384,
//!   "index": "<base64(lz4(json entries))>",
//!   "indexed-files": ["notes/a.md"],
//!   "file-chunk-ids": [["notes/a.md", ["notes/a.md:0"]]]
//! }
//! ```
//!
//! All three parts are written together through a temp file and an atomic
//! rename, so a crash never leaves them out of step on disk.

use super::{IndexedEntry, VectorIndex};
use crate::{EngineError, EngineResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Snapshot file name inside the index directory.
pub const SNAPSHOT_FILE: &str = "index.json";

/// Bumped whenever the snapshot layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub model: String,
    pub dim: usize,
    index: String,
    #[serde(rename = "indexed-files")]
    indexed_files: Vec<String>,
    #[serde(rename = "file-chunk-ids")]
    file_chunk_ids: Vec<(String, Vec<String>)>,
}

fn corrupt(path: &Path, reason: impl ToString) -> EngineError {
    EngineError::Persistence {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl IndexSnapshot {
    /// Serialize the current index state.
    pub fn capture(index: &VectorIndex, model: &str) -> EngineResult<Self> {
        let mut entries: Vec<&IndexedEntry> = index.entries().collect();
        entries.sort_by(|a, b| {
            a.source_path
                .cmp(&b.source_path)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });

        let json = serde_json::to_vec(&entries).map_err(|e| corrupt(Path::new(SNAPSHOT_FILE), e))?;
        let compressed = lz4_flex::compress_prepend_size(&json);

        let file_chunk_ids: BTreeMap<&String, &Vec<String>> = index.file_chunk_map().iter().collect();

        Ok(Self {
            version: SNAPSHOT_VERSION,
            model: model.to_string(),
            dim: index.dimension().unwrap_or(0),
            index: STANDARD.encode(compressed),
            indexed_files: index.indexed_paths(),
            file_chunk_ids: file_chunk_ids
                .into_iter()
                .map(|(path, ids)| (path.clone(), ids.clone()))
                .collect(),
        })
    }

    /// Write atomically to `path`.
    pub fn write(&self, path: &Path) -> EngineResult<()> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::FileWrite {
            path: dir.clone(),
            source: e,
        })?;

        let json = serde_json::to_vec(self).map_err(|e| corrupt(path, e))?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| EngineError::FileWrite {
            path: dir.clone(),
            source: e,
        })?;
        temp.write_all(&json).map_err(|e| EngineError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        temp.as_file().sync_all().map_err(|e| EngineError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        temp.persist(path).map_err(|e| EngineError::FileWrite {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        debug!(path = %path.display(), files = self.indexed_files.len(), "index snapshot written");
        Ok(())
    }

    /// Read a snapshot. A missing file is `Ok(None)`.
    pub fn read(path: &Path) -> EngineResult<Option<Self>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::FileRead {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| corrupt(path, e))
    }

    /// Decode entries and rebuild the index.
    ///
    /// The path maps are always rebuilt from the entries; a disagreement with
    /// the stored maps is logged.
    pub fn into_index(self, path: &Path) -> EngineResult<VectorIndex> {
        let compressed = STANDARD.decode(&self.index).map_err(|e| corrupt(path, e))?;
        let json = lz4_flex::decompress_size_prepended(&compressed).map_err(|e| corrupt(path, e))?;
        let entries: Vec<IndexedEntry> = serde_json::from_slice(&json).map_err(|e| corrupt(path, e))?;

        if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != self.dim) {
            return Err(corrupt(
                path,
                format!(
                    "entry {} has {} components, snapshot declares {}",
                    bad.id,
                    bad.vector.len(),
                    self.dim
                ),
            ));
        }

        let mut index = VectorIndex::new();
        index.insert(entries);

        let stored: BTreeMap<String, Vec<String>> = self.file_chunk_ids.into_iter().collect();
        let rebuilt: BTreeMap<String, Vec<String>> = index
            .file_chunk_map()
            .iter()
            .map(|(path, ids)| (path.clone(), ids.clone()))
            .collect();
        if self.indexed_files != index.indexed_paths() || stored != rebuilt {
            warn!(
                path = %path.display(),
                "snapshot path maps disagree with entries, rebuilt from entries"
            );
        }

        Ok(index)
    }
}

/// Load the snapshot at `path` for `model`.
///
/// Returns `Ok(None)` when there is no snapshot or it was written by another
/// model or layout version; the caller starts from an empty index.
pub fn restore(path: &Path, model: &str) -> EngineResult<Option<VectorIndex>> {
    let Some(snapshot) = IndexSnapshot::read(path)? else {
        return Ok(None);
    };

    if snapshot.version != SNAPSHOT_VERSION || snapshot.model != model {
        info!(
            version = snapshot.version,
            snapshot_model = %snapshot.model,
            model,
            "discarding index snapshot from another model or version"
        );
        return Ok(None);
    }

    let index = snapshot.into_index(path)?;
    info!(
        files = index.file_count(),
        chunks = index.len(),
        "index restored from snapshot"
    );
    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;
    use tempfile::TempDir;

    fn chunk(index: usize, vector: Vec<f32>) -> Chunk {
        Chunk {
            chunk_index: index,
            range: (index * 5, index * 5 + 8),
            hash: format!("h{index}"),
            vector,
        }
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new();
        index.insert_document("a.md", &[chunk(0, vec![0.6, 0.8]), chunk(1, vec![1.0, 0.0])]);
        index.insert_document("dir/b.md", &[chunk(0, vec![0.0, -1.0])]);
        index
    }

    #[test]
    fn test_snapshot_restores_entries_and_maps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let index = sample_index();

        IndexSnapshot::capture(&index, "m").unwrap().write(&path).unwrap();
        let restored = restore(&path, "m").unwrap().unwrap();

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.indexed_paths(), index.indexed_paths());
        assert_eq!(restored.chunk_ids("a.md"), ["a.md:0", "a.md:1"]);
        let entry = restored.get("a.md:0").unwrap();
        assert_eq!(entry.range, (0, 8));
        assert!((entry.vector[1] - 0.8).abs() < 4e-5);
    }

    #[test]
    fn test_snapshot_file_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        IndexSnapshot::capture(&sample_index(), "m").unwrap().write(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["version"], SNAPSHOT_VERSION);
        assert_eq!(json["dim"], 2);
        assert!(json["index"].is_string());
        assert_eq!(json["indexed-files"], serde_json::json!(["a.md", "dir/b.md"]));
        assert_eq!(
            json["file-chunk-ids"][1],
            serde_json::json!(["dir/b.md", ["dir/b.md:0"]])
        );
    }

    #[test]
    fn test_missing_or_foreign_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        assert!(restore(&path, "m").unwrap().is_none());

        IndexSnapshot::capture(&sample_index(), "m").unwrap().write(&path).unwrap();
        assert!(restore(&path, "other").unwrap().is_none());
    }

    #[test]
    fn test_inconsistent_maps_are_rebuilt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let mut snapshot = IndexSnapshot::capture(&sample_index(), "m").unwrap();
        snapshot.indexed_files = vec!["ghost.md".to_string()];
        snapshot.file_chunk_ids.clear();
        snapshot.write(&path).unwrap();

        let restored = restore(&path, "m").unwrap().unwrap();
        assert!(!restored.is_indexed("ghost.md"));
        assert!(restored.is_indexed("dir/b.md"));
        assert_eq!(restored.chunk_ids("dir/b.md"), ["dir/b.md:0"]);
    }

    #[test]
    fn test_corrupt_snapshot_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        std::fs::write(&path, b"{\"version\": 1").unwrap();
        assert!(matches!(
            restore(&path, "m"),
            Err(EngineError::Persistence { .. })
        ));
    }
}
