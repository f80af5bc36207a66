//! Content-addressed per-document embedding cache.
//!
//! Each source document maps to one JSON record under `<index_dir>/cache/`.
//! A record is only trusted when it parses, every vector has the recorded
//! dimension, and both the content hash and the model id match the caller's.
//! Anything else reads as "not valid" and the document is re-embedded.

use crate::types::{CharRange, Chunk};
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const DIR_SUFFIX: &str = ".d";
const LEAF_SUFFIX: &str = ".json";

/// One chunk as stored in a cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedChunk {
    pub range: CharRange,
    pub hash: String,
    #[serde(with = "crate::codec::serde_vector")]
    pub vector: Vec<f32>,
}

/// Persisted embeddings of one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCacheEntry {
    #[serde(rename = "model")]
    pub model_id: String,
    #[serde(rename = "dim")]
    pub vector_dim: usize,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    pub chunks: Vec<CachedChunk>,
}

impl DocumentCacheEntry {
    pub fn new(model_id: &str, vector_dim: usize, content_hash: &str, chunks: &[Chunk]) -> Self {
        Self {
            model_id: model_id.to_string(),
            vector_dim,
            content_hash: content_hash.to_string(),
            chunks: chunks
                .iter()
                .map(|chunk| CachedChunk {
                    range: chunk.range,
                    hash: chunk.hash.clone(),
                    vector: chunk.vector.clone(),
                })
                .collect(),
        }
    }

    /// Chunks in stored order, indexed by position.
    pub fn to_chunks(&self) -> Vec<Chunk> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(chunk_index, cached)| Chunk {
                chunk_index,
                range: cached.range,
                hash: cached.hash.clone(),
                vector: cached.vector.clone(),
            })
            .collect()
    }

    /// Every vector must have `vector_dim` components.
    fn check_dimension(&self) -> Result<(), String> {
        match self
            .chunks
            .iter()
            .position(|chunk| chunk.vector.len() != self.vector_dim)
        {
            Some(i) => Err(format!(
                "chunk {i} has {} components, record declares {}",
                self.chunks[i].vector.len(),
                self.vector_dim
            )),
            None => Ok(()),
        }
    }
}

/// Convert a document path into its workspace-relative key.
///
/// Relative paths are taken as already relative to `root`. The key uses `/`
/// separators. Paths escaping the root, `..` components and empty paths are
/// rejected.
pub fn workspace_relative(root: &Path, path: &Path) -> EngineResult<String> {
    let outside = || EngineError::PathOutsideWorkspace {
        path: path.to_path_buf(),
    };

    let relative = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| outside())?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside());
            }
        }
    }

    if parts.is_empty() {
        return Err(outside());
    }
    Ok(parts.join("/"))
}

/// On-disk store of [`DocumentCacheEntry`] records.
#[derive(Debug, Clone)]
pub struct CacheStore {
    workspace_root: PathBuf,
    cache_root: PathBuf,
}

impl CacheStore {
    /// Create a store writing under `cache_root`.
    pub fn new(workspace_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Record location for a document.
    ///
    /// Directory components get a `.d` suffix and the leaf a `.json` suffix,
    /// so a file and a directory of the same name never collide.
    pub fn cache_path(&self, document: &Path) -> EngineResult<PathBuf> {
        let key = workspace_relative(&self.workspace_root, document)?;
        let mut parts: Vec<&str> = key.split('/').collect();
        let leaf = parts.pop().unwrap_or_default();

        let mut path = self.cache_root.clone();
        for dir in parts {
            path.push(format!("{dir}{DIR_SUFFIX}"));
        }
        path.push(format!("{leaf}{LEAF_SUFFIX}"));
        Ok(path)
    }

    /// Read a record. A missing record is `Ok(None)`.
    pub fn load(&self, document: &Path) -> EngineResult<Option<DocumentCacheEntry>> {
        let path = self.cache_path(document)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::FileRead { path, source: e }),
        };

        let entry: DocumentCacheEntry =
            serde_json::from_str(&raw).map_err(|e| EngineError::CacheCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        entry
            .check_dimension()
            .map_err(|reason| EngineError::CacheCorrupt { path, reason })?;
        Ok(Some(entry))
    }

    /// Whether the stored record matches this content and model. Fail-closed.
    pub fn is_valid(&self, document: &Path, content_hash: &str, model_id: &str) -> bool {
        match self.load(document) {
            Ok(Some(entry)) => entry.content_hash == content_hash && entry.model_id == model_id,
            Ok(None) => false,
            Err(e) => {
                debug!(path = %document.display(), error = %e, "cache record rejected");
                false
            }
        }
    }

    /// Write a record atomically, creating parent directories.
    pub fn save(&self, document: &Path, entry: &DocumentCacheEntry) -> EngineResult<()> {
        let path = self.cache_path(document)?;
        let parent = path.parent().unwrap_or(&self.cache_root).to_path_buf();
        std::fs::create_dir_all(&parent).map_err(|e| EngineError::FileWrite {
            path: parent.clone(),
            source: e,
        })?;

        let json = serde_json::to_vec(entry).map_err(|e| EngineError::Persistence {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| {
            EngineError::FileWrite {
                path: parent.clone(),
                source: e,
            }
        })?;
        temp.write_all(&json).map_err(|e| EngineError::FileWrite {
            path: path.clone(),
            source: e,
        })?;
        temp.persist(&path).map_err(|e| EngineError::FileWrite {
            path: path.clone(),
            source: e.error,
        })?;

        debug!(path = %path.display(), chunks = entry.chunks.len(), "cache record saved");
        Ok(())
    }

    /// Remove a record. Returns whether one existed.
    pub fn delete(&self, document: &Path) -> EngineResult<bool> {
        let path = self.cache_path(document)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::FileWrite { path, source: e }),
        }
    }

    /// Remove every record.
    pub fn clear_all(&self) -> EngineResult<()> {
        match std::fs::remove_dir_all(&self.cache_root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %self.cache_root.display(), error = %e, "failed to clear cache");
                Err(EngineError::FileWrite {
                    path: self.cache_root.clone(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::new(dir.path(), dir.path().join(".semdex").join("cache"))
    }

    fn sample_entry() -> DocumentCacheEntry {
        let chunks = vec![
            Chunk {
                chunk_index: 0,
                range: (0, 10),
                hash: codec::hash("first"),
                vector: vec![0.6, 0.8, 0.0],
            },
            Chunk {
                chunk_index: 1,
                range: (8, 20),
                hash: codec::hash("second"),
                vector: vec![0.0, -1.0, 0.0],
            },
        ];
        DocumentCacheEntry::new("test-model", 3, &codec::hash("content"), &chunks)
    }

    #[test]
    fn test_cache_path_suffixes_components() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.cache_root().to_path_buf();

        assert_eq!(
            store.cache_path(Path::new("notes/rust/intro.md")).unwrap(),
            root.join("notes.d").join("rust.d").join("intro.md.json")
        );
        assert_eq!(
            store.cache_path(&dir.path().join("README.md")).unwrap(),
            root.join("README.md.json")
        );
        assert_eq!(
            store.cache_path(Path::new("./a.md")).unwrap(),
            root.join("a.md.json")
        );
    }

    #[test]
    fn test_cache_path_is_injective_for_file_and_dir_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let paths = ["a", "a/b", "a.d/b", "a.json", "a/b.json", "a.json/b"];
        let keys: std::collections::HashSet<PathBuf> = paths
            .iter()
            .map(|p| store.cache_path(Path::new(p)).unwrap())
            .collect();
        assert_eq!(keys.len(), paths.len());
    }

    #[test]
    fn test_cache_path_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for bad in ["../secret.md", "notes/../../x.md", "", "."] {
            assert!(
                matches!(
                    store.cache_path(Path::new(bad)),
                    Err(EngineError::PathOutsideWorkspace { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(store.cache_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let entry = sample_entry();
        let doc = Path::new("docs/guide.md");

        assert_eq!(store.load(doc).unwrap(), None);
        store.save(doc, &entry).unwrap();

        let loaded = store.load(doc).unwrap().unwrap();
        assert_eq!(loaded.model_id, "test-model");
        assert_eq!(loaded.vector_dim, 3);
        assert_eq!(loaded.chunks.len(), 2);
        assert_eq!(loaded.chunks[1].range, (8, 20));
        for (a, b) in loaded.chunks[0].vector.iter().zip(&entry.chunks[0].vector) {
            assert!((a - b).abs() < 4e-5);
        }

        let chunks = loaded.to_chunks();
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_record_uses_wire_field_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = Path::new("a.md");
        store.save(doc, &sample_entry()).unwrap();

        let raw = std::fs::read_to_string(store.cache_path(doc).unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["dim"], 3);
        assert!(json["contentHash"].is_string());
        assert_eq!(json["chunks"][0]["range"], serde_json::json!([0, 10]));
        assert!(json["chunks"][0]["vector"].is_string());
    }

    #[test]
    fn test_validity_fails_closed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = Path::new("a.md");
        let hash = codec::hash("content");

        assert!(!store.is_valid(doc, &hash, "test-model"));

        store.save(doc, &sample_entry()).unwrap();
        assert!(store.is_valid(doc, &hash, "test-model"));
        assert!(!store.is_valid(doc, &codec::hash("edited"), "test-model"));
        assert!(!store.is_valid(doc, &hash, "other-model"));

        let path = store.cache_path(doc).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();

        // Truncated record
        std::fs::write(&path, &raw[..raw.len() / 2]).unwrap();
        assert!(!store.is_valid(doc, &hash, "test-model"));
        assert!(matches!(
            store.load(doc),
            Err(EngineError::CacheCorrupt { .. })
        ));

        // Dimension no longer matches the vectors
        std::fs::write(&path, raw.replace("\"dim\":3", "\"dim\":4")).unwrap();
        assert!(!store.is_valid(doc, &hash, "test-model"));

        // Vector payload that is not base64
        let mut json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        json["chunks"][0]["vector"] = serde_json::Value::String("not base64!".into());
        std::fs::write(&path, json.to_string()).unwrap();
        assert!(!store.is_valid(doc, &hash, "test-model"));
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let entry = sample_entry();

        assert!(!store.delete(Path::new("missing.md")).unwrap());

        store.save(Path::new("a.md"), &entry).unwrap();
        store.save(Path::new("sub/b.md"), &entry).unwrap();
        assert!(store.delete(Path::new("a.md")).unwrap());
        assert_eq!(store.load(Path::new("a.md")).unwrap(), None);

        store.clear_all().unwrap();
        assert_eq!(store.load(Path::new("sub/b.md")).unwrap(), None);
        store.clear_all().unwrap();
    }
}
