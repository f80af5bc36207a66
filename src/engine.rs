//! Engine facade: owns every component and exposes the query and admin API.

use crate::cache::CacheStore;
use crate::config::Settings;
use crate::coordinator::{ChangeCoordinator, CoordinatorOptions};
use crate::document::{snippet, strip_frontmatter};
use crate::embedding::{
    Chunker, EmbeddingBackend, EmbeddingService, FastEmbedBackend, HASHING_MODEL_NAME,
    HashingBackend, ServiceOptions,
};
use crate::index::{DebouncedPersister, SNAPSHOT_FILE, SharedIndex, restore_snapshot};
use crate::scheduler::{SchedulerStats, TaskScheduler};
use crate::types::{CharRange, IndexReport};
use crate::walker::WorkspaceWalker;
use crate::watcher::WorkspaceWatcher;
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One search hit as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Workspace-relative path
    pub file_path: String,
    pub range: CharRange,
    pub score: f32,
    pub snippet: String,
}

/// Point-in-time engine state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub workspace_root: PathBuf,
    pub model_id: String,
    pub model_ready: bool,
    pub dimension: Option<usize>,
    pub documents: usize,
    pub chunks: usize,
    pub pending_changes: usize,
    pub unsaved_changes: bool,
    pub snapshot_writes: usize,
    pub scheduler: SchedulerStats,
    pub last_report: Option<IndexReport>,
}

/// Build the backend named by the settings.
pub fn backend_from_settings(settings: &Settings) -> EngineResult<Arc<dyn EmbeddingBackend>> {
    let embedding = &settings.embedding;
    if embedding.model == HASHING_MODEL_NAME {
        return Ok(Arc::new(HashingBackend::new(embedding.hashing_dimension)));
    }

    let cache_dir = embedding.cache_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .map(|dir| dir.join("semdex").join("models"))
            .unwrap_or_else(|| settings.index_dir_path().join("models"))
    });
    Ok(Arc::new(
        FastEmbedBackend::new(&embedding.model, cache_dir)?
            .with_download_progress(embedding.show_download_progress),
    ))
}

/// The semantic search engine for one workspace.
pub struct Engine {
    settings: Settings,
    root: PathBuf,
    index_dir: PathBuf,
    service: Arc<EmbeddingService>,
    cache: Arc<CacheStore>,
    index: SharedIndex,
    persister: Arc<DebouncedPersister>,
    coordinator: ChangeCoordinator,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.root)
            .field("index_dir", &self.index_dir)
            .field("service", &self.service)
            .finish()
    }
}

impl Engine {
    /// Open the engine with the backend configured in `settings`.
    pub fn open(settings: Settings) -> EngineResult<Self> {
        let backend = backend_from_settings(&settings)?;
        Self::with_backend(settings, backend)
    }

    /// Open the engine with an explicit backend.
    ///
    /// Restores the index snapshot when one exists for the same model. The
    /// model itself is not loaded until [`init`](Self::init).
    pub fn with_backend(settings: Settings, backend: Arc<dyn EmbeddingBackend>) -> EngineResult<Self> {
        settings.validate()?;

        let configured_root = settings.root();
        let root = std::fs::canonicalize(&configured_root).unwrap_or(configured_root);
        let index_dir = if settings.index_dir.is_absolute() {
            settings.index_dir.clone()
        } else {
            root.join(&settings.index_dir)
        };
        std::fs::create_dir_all(&index_dir).map_err(|e| EngineError::FileWrite {
            path: index_dir.clone(),
            source: e,
        })?;

        let embedding = &settings.embedding;
        let options = ServiceOptions {
            chunker: Chunker::new(embedding.window_tokens, embedding.overlap_tokens)?,
            document_prefix: embedding.document_prefix.clone(),
            query_prefix: embedding.query_prefix.clone(),
            task_timeout: embedding.task_timeout(),
            query_timeout: embedding.query_timeout(),
        };
        let scheduler = TaskScheduler::new(embedding.concurrency);
        let service = Arc::new(EmbeddingService::new(backend, scheduler, options));
        let model_id = service.model_id().to_string();

        let snapshot_path = index_dir.join(SNAPSHOT_FILE);
        let restored = match restore_snapshot(&snapshot_path, &model_id) {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "index snapshot unreadable, starting empty");
                None
            }
        };
        let index = restored.unwrap_or_default().shared();

        let persister = Arc::new(DebouncedPersister::new(
            Arc::clone(&index),
            snapshot_path,
            &model_id,
            Duration::from_millis(settings.index.persist_debounce_ms),
        ));
        let cache = Arc::new(CacheStore::new(&root, index_dir.join("cache")));
        let walker = WorkspaceWalker::new(
            &root,
            &settings.watch.include,
            &settings.watch.exclude,
            &index_dir,
        )?;
        let coordinator = ChangeCoordinator::new(
            Arc::clone(&service),
            Arc::clone(&cache),
            Arc::clone(&index),
            Arc::clone(&persister),
            walker,
            CoordinatorOptions {
                debounce: Duration::from_millis(settings.watch.debounce_ms),
                concurrency: settings.watch.concurrency,
                git_rescan: settings.watch.git_rescan,
            },
        );

        info!(root = %root.display(), model = %model_id, "engine opened");

        Ok(Self {
            settings,
            root,
            index_dir,
            service,
            cache,
            index,
            persister,
            coordinator,
        })
    }

    /// Load the embedding model. Idempotent.
    pub async fn init(&self) -> EngineResult<()> {
        self.service.init().await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn coordinator(&self) -> &ChangeCoordinator {
        &self.coordinator
    }

    /// Start a filesystem watcher over the workspace.
    pub fn watcher(&self) -> EngineResult<WorkspaceWatcher> {
        WorkspaceWatcher::new(self.coordinator.walker().clone(), &self.index_dir)
    }

    /// Semantic search over indexed chunks.
    ///
    /// `limit` defaults to the configured limit. `path_prefix` restricts hits
    /// to documents under a workspace-relative prefix.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        path_prefix: Option<&str>,
    ) -> EngineResult<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.service.embed_query(query).await?;
        let limit = limit.unwrap_or(self.settings.index.default_limit);
        let hits = self.index.read().search(
            &vector,
            limit,
            self.settings.index.similarity_floor,
            path_prefix,
        );
        debug!(query, hits = hits.len(), "search");

        // Each file is read once however many of its chunks matched
        let mut bodies: HashMap<String, Option<String>> = HashMap::new();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let path = hit.entry.source_path;
            if !bodies.contains_key(&path) {
                let content = tokio::fs::read_to_string(self.root.join(&path)).await.ok();
                bodies.insert(path.clone(), content);
            }
            let preview = match bodies.get(&path).and_then(Option::as_deref) {
                Some(content) => snippet(
                    strip_frontmatter(content),
                    hit.entry.range.0,
                    hit.entry.range.1,
                    self.settings.index.snippet_chars,
                ),
                None => String::new(),
            };

            results.push(SearchResult {
                file_path: path,
                range: hit.entry.range,
                score: hit.score,
                snippet: preview,
            });
        }

        Ok(results)
    }

    /// Index specific files now.
    pub async fn index_paths(&self, paths: &[PathBuf]) -> IndexReport {
        self.coordinator.index_paths(paths).await
    }

    /// Walk the whole workspace and bring the index up to date.
    pub async fn reindex_all(&self) -> IndexReport {
        self.coordinator.rescan().await
    }

    /// Drop every indexed chunk and cached vector.
    pub fn clear_index(&self) -> EngineResult<()> {
        self.index.write().clear();
        self.cache.clear_all()?;
        self.persister.schedule();
        info!("index and cache cleared");
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        let (documents, chunks) = {
            let index = self.index.read();
            (index.file_count(), index.len())
        };

        EngineStatus {
            workspace_root: self.root.clone(),
            model_id: self.service.model_id().to_string(),
            model_ready: self.service.is_ready(),
            dimension: self.service.dimension(),
            documents,
            chunks,
            pending_changes: self.coordinator.pending_count(),
            unsaved_changes: self.persister.is_dirty(),
            snapshot_writes: self.persister.writes(),
            scheduler: self.service.scheduler().stats(),
            last_report: self.coordinator.last_report(),
        }
    }

    /// Process pending changes and write the final snapshot.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let report = self.coordinator.flush_pending().await;
        if report.total() > 0 {
            debug!(?report, "flushed pending changes");
        }
        self.persister.flush()?;
        info!("engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HASHING_MODEL_ID;
    use tempfile::TempDir;

    fn hashing_settings(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.workspace_root = Some(root.to_path_buf());
        settings.embedding.model = HASHING_MODEL_NAME.to_string();
        settings.index.similarity_floor = 0.0;
        settings
    }

    #[test]
    fn test_hashing_model_name_selects_hashing_backend() {
        let dir = TempDir::new().unwrap();
        let backend = backend_from_settings(&hashing_settings(dir.path())).unwrap();
        assert!(backend.model_id().starts_with(HASHING_MODEL_ID));
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut settings = hashing_settings(dir.path());
        settings.embedding.model = "no-such-model".to_string();
        assert!(Engine::open(settings).is_err());
    }

    #[tokio::test]
    async fn test_search_before_init_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(hashing_settings(dir.path())).unwrap();

        let result = engine.search("anything", None, None).await;
        assert!(matches!(result, Err(EngineError::ModelNotReady)));
        assert!(dir.path().join(".semdex").is_dir());
    }

    #[tokio::test]
    async fn test_blank_query_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(hashing_settings(dir.path())).unwrap();
        engine.init().await.unwrap();

        assert!(engine.search("   ", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_reflects_indexed_documents() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Alpha\n\nrust ownership rules").unwrap();
        let engine = Engine::open(hashing_settings(dir.path())).unwrap();
        engine.init().await.unwrap();

        let report = engine.reindex_all().await;
        assert_eq!(report.embedded, 1);

        let status = engine.status();
        assert!(status.model_ready);
        assert_eq!(status.documents, 1);
        assert!(status.chunks >= 1);
        assert!(status.model_id.starts_with(HASHING_MODEL_ID));

        engine.clear_index().unwrap();
        assert_eq!(engine.status().documents, 0);
    }
}
