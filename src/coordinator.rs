//! Change coordination: keeps index and cache in step with the workspace.
//!
//! Edits are debounced into batches, deletions apply immediately and git
//! state changes trigger a full rescan. Every document goes through the same
//! validity check, so a rescan only embeds what actually changed.
//!
//! At most one job works on a path at a time. A request for a busy path is
//! deferred and replayed through the debounce queue when the job settles. A
//! delete marks the busy job so its result is dropped instead of committed.
//! Rescans are single-flight: requests arriving during a rescan collapse
//! into one follow-up pass.

use crate::cache::{CacheStore, DocumentCacheEntry, workspace_relative};
use crate::codec;
use crate::document::extract_title;
use crate::embedding::EmbeddingService;
use crate::index::{DebouncedPersister, SharedIndex};
use crate::types::{Chunk, IndexReport, IndexingOutcome};
use crate::walker::WorkspaceWalker;
use crate::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Filesystem-level change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Changed(PathBuf),
    Created(PathBuf),
    Deleted(PathBuf),
    /// Branch switch, checkout, reset: anything may have changed
    GitStateChanged,
    RescanAll,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub debounce: Duration,
    /// Documents processed concurrently per batch
    pub concurrency: usize,
    /// Rescan the workspace on git state changes
    pub git_rescan: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            concurrency: 5,
            git_rescan: true,
        }
    }
}

/// Bookkeeping for a path with a job in progress.
#[derive(Debug, Default)]
struct InFlight {
    /// Deleted while the job ran; its result must not be committed
    deleted: bool,
    /// Requested again while the job ran
    rerun: bool,
}

#[derive(Debug, Default)]
struct RescanState {
    running: bool,
    requested: bool,
}

/// Releases a claimed path when its job ends, even if the job is dropped.
struct ClaimGuard<'a> {
    coordinator: &'a ChangeCoordinator,
    key: &'a str,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let rerun = self
            .coordinator
            .in_flight
            .lock()
            .remove(self.key)
            .is_some_and(|slot| slot.rerun);
        if rerun {
            debug!(path = %self.key, "replaying deferred request");
            self.coordinator.pending.lock().insert(self.key.to_string());
            if tokio::runtime::Handle::try_current().is_ok() {
                self.coordinator.arm_timer();
            }
        }
    }
}

/// Batches change events and re-indexes documents.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ChangeCoordinator {
    root: PathBuf,
    service: Arc<EmbeddingService>,
    cache: Arc<CacheStore>,
    index: SharedIndex,
    persister: Arc<DebouncedPersister>,
    walker: WorkspaceWalker,
    admission: Arc<Semaphore>,
    options: CoordinatorOptions,
    pending: Arc<Mutex<BTreeSet<String>>>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    rescan_state: Arc<Mutex<RescanState>>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    last_report: Arc<Mutex<Option<IndexReport>>>,
}

impl std::fmt::Debug for ChangeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeCoordinator")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl ChangeCoordinator {
    pub fn new(
        service: Arc<EmbeddingService>,
        cache: Arc<CacheStore>,
        index: SharedIndex,
        persister: Arc<DebouncedPersister>,
        walker: WorkspaceWalker,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            root: walker.root().to_path_buf(),
            service,
            cache,
            index,
            persister,
            walker,
            admission: Arc::new(Semaphore::new(options.concurrency.max(1))),
            options,
            pending: Arc::new(Mutex::new(BTreeSet::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            rescan_state: Arc::new(Mutex::new(RescanState::default())),
            timer: Arc::new(Mutex::new(None)),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    pub fn walker(&self) -> &WorkspaceWalker {
        &self.walker
    }

    /// Paths waiting for the debounce timer.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether a background rescan is running or queued.
    pub fn rescan_in_progress(&self) -> bool {
        self.rescan_state.lock().running
    }

    /// Report of the most recent batch.
    pub fn last_report(&self) -> Option<IndexReport> {
        *self.last_report.lock()
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        match workspace_relative(&self.root, path) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring path outside workspace");
                None
            }
        }
    }

    /// Feed one event. Must be called from within a tokio runtime.
    pub fn handle(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::Changed(path) | ChangeEvent::Created(path) => {
                if !self.walker.accepts(&path) {
                    return;
                }
                if let Some(key) = self.key_for(&path) {
                    self.pending.lock().insert(key);
                    self.arm_timer();
                }
            }
            ChangeEvent::Deleted(path) => {
                if let Some(key) = self.key_for(&path) {
                    if let Err(e) = self.remove_path(&key) {
                        warn!(path = %key, error = %e, "failed to remove deleted document");
                    }
                }
            }
            ChangeEvent::GitStateChanged if !self.options.git_rescan => {
                debug!("git state changed, rescan disabled");
            }
            ChangeEvent::GitStateChanged | ChangeEvent::RescanAll => self.request_rescan(),
        }
    }

    /// Start a background rescan, or queue one follow-up if one is running.
    fn request_rescan(&self) {
        {
            let mut state = self.rescan_state.lock();
            if state.running {
                state.requested = true;
                debug!("rescan already running, queued a follow-up");
                return;
            }
            state.running = true;
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.rescan().await;
                let mut state = this.rescan_state.lock();
                if !state.requested {
                    state.running = false;
                    break;
                }
                state.requested = false;
            }
        });
    }

    fn arm_timer(&self) {
        let this = self.clone();
        let debounce = self.options.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Detach the batch so re-arming the timer cannot cancel it
            tokio::spawn(async move {
                let batch = this.drain_pending();
                if !batch.is_empty() {
                    this.dispatch(batch).await;
                }
            });
        });

        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn drain_pending(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .collect()
    }

    /// Process everything pending right away.
    pub async fn flush_pending(&self) -> IndexReport {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        let batch = self.drain_pending();
        if batch.is_empty() {
            return IndexReport::default();
        }
        self.dispatch(batch).await
    }

    /// Index specific files now. Paths that are not documents are skipped.
    pub async fn index_paths(&self, paths: &[PathBuf]) -> IndexReport {
        let keys: BTreeSet<String> = paths
            .iter()
            .filter(|path| {
                let accepted = self.walker.accepts(path);
                if !accepted {
                    info!(path = %path.display(), "not a document, skipping");
                }
                accepted
            })
            .filter_map(|path| self.key_for(path))
            .collect();
        self.dispatch(keys.into_iter().collect()).await
    }

    /// Re-index the whole workspace and drop documents that vanished.
    pub async fn rescan(&self) -> IndexReport {
        let walker = self.walker.clone();
        let files = match tokio::task::spawn_blocking(move || walker.walk().collect::<Vec<_>>()).await
        {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "workspace walk failed");
                return IndexReport::default();
            }
        };

        let keys: BTreeSet<String> = files.iter().filter_map(|path| self.key_for(path)).collect();
        let stale: Vec<String> = self
            .index
            .read()
            .indexed_paths()
            .into_iter()
            .filter(|path| !keys.contains(path))
            .collect();

        let mut report = IndexReport::default();
        for key in stale {
            self.mark_deleted(&key);
            match self.remove_document(&key) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(path = %key, error = %e, "failed to remove vanished document");
                    report.failed += 1;
                }
            }
        }

        info!(documents = keys.len(), "rescanning workspace");
        report.merge(self.dispatch(keys.into_iter().collect()).await);
        *self.last_report.lock() = Some(report);
        report
    }

    /// Run one re-index job per path, bounded by the admission semaphore.
    async fn dispatch(&self, keys: Vec<String>) -> IndexReport {
        let mut jobs = JoinSet::new();
        for key in keys {
            let this = self.clone();
            jobs.spawn(async move {
                let Ok(_permit) = Arc::clone(&this.admission).acquire_owned().await else {
                    return (key, Err(EngineError::TaskFailed("admission closed".into())));
                };
                let outcome = this.index_document(&key).await;
                (key, outcome)
            });
        }

        let mut report = IndexReport::default();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((key, Ok(outcome))) => {
                    debug!(path = %key, ?outcome, "document processed");
                    report.record(outcome);
                }
                Ok((key, Err(e))) => {
                    warn!(path = %key, error = %e, "failed to index document");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "indexing job aborted");
                    report.failed += 1;
                }
            }
        }

        if report.total() > 0 {
            info!(
                embedded = report.embedded,
                reused = report.reused,
                unchanged = report.unchanged,
                removed = report.removed,
                deferred = report.deferred,
                failed = report.failed,
                "batch indexed"
            );
        }
        *self.last_report.lock() = Some(report);
        report
    }

    /// Bring one document's index entries and cache record up to date.
    ///
    /// Returns [`IndexingOutcome::Deferred`] when another job holds the path.
    pub async fn index_document(&self, key: &str) -> EngineResult<IndexingOutcome> {
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(slot) = in_flight.get_mut(key) {
                slot.rerun = true;
                debug!(path = %key, "document busy, deferring");
                return Ok(IndexingOutcome::Deferred);
            }
            in_flight.insert(key.to_string(), InFlight::default());
        }
        let _claim = ClaimGuard {
            coordinator: self,
            key,
        };
        self.process_document(key).await
    }

    async fn process_document(&self, key: &str) -> EngineResult<IndexingOutcome> {
        let absolute = self.root.join(key);
        let content = match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.remove_document(key)?;
                return Ok(IndexingOutcome::Removed);
            }
            Err(e) => {
                return Err(EngineError::FileRead {
                    path: absolute,
                    source: e,
                });
            }
        };

        let rel = Path::new(key);
        let content_hash = codec::hash(&content);
        let model_id = self.service.model_id().to_string();

        if self.cache.is_valid(rel, &content_hash, &model_id) {
            if self.index.read().is_indexed(key) {
                return Ok(IndexingOutcome::Unchanged);
            }
            if let Some(entry) = self.cache.load(rel)? {
                let chunks = entry.to_chunks();
                if !self.commit(key, None, &chunks)? {
                    return Ok(IndexingOutcome::Removed);
                }
                return Ok(IndexingOutcome::Reused {
                    chunks: chunks.len(),
                });
            }
        }

        let title = extract_title(&content);
        let document = self
            .service
            .embed_document_chunks(key, &content, title.as_deref())
            .await?;

        if document.chunks.is_empty() {
            self.remove_document(key)?;
            return Ok(IndexingOutcome::Empty);
        }

        let dimension = document.chunks[0].vector.len();
        let entry = DocumentCacheEntry::new(
            &model_id,
            dimension,
            &document.content_hash,
            &document.chunks,
        );
        if !self.commit(key, Some(&entry), &document.chunks)? {
            return Ok(IndexingOutcome::Removed);
        }

        Ok(IndexingOutcome::Embedded {
            chunks: document.chunks.len(),
        })
    }

    /// Write a finished job's cache record and index entries.
    ///
    /// Holds the in-flight table for the whole write so a concurrent delete
    /// lands either before (result dropped) or after (result removed).
    /// Returns `false` when the path was deleted while the job ran.
    fn commit(
        &self,
        key: &str,
        entry: Option<&DocumentCacheEntry>,
        chunks: &[Chunk],
    ) -> EngineResult<bool> {
        let in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|slot| slot.deleted) {
            debug!(path = %key, "deleted while indexing, dropping result");
            return Ok(false);
        }
        if let Some(entry) = entry {
            self.cache.save(Path::new(key), entry)?;
        }
        {
            let mut index = self.index.write();
            index.remove_by_path(key);
            index.insert_document(key, chunks);
        }
        drop(in_flight);

        self.persister.schedule();
        Ok(true)
    }

    /// Flag jobs running on `key`, or anywhere below it, as deleted.
    fn mark_deleted(&self, key: &str) {
        let dir_prefix = format!("{key}/");
        for (path, slot) in self.in_flight.lock().iter_mut() {
            if path == key || path.starts_with(&dir_prefix) {
                slot.deleted = true;
                slot.rerun = false;
            }
        }
    }

    fn remove_document(&self, key: &str) -> EngineResult<()> {
        let removed = self.index.write().remove_by_path(key);
        self.cache.delete(Path::new(key))?;
        if removed > 0 {
            self.persister.schedule();
        }
        Ok(())
    }

    /// Remove a deleted file, or every document under a deleted directory.
    ///
    /// Returns whether anything was indexed there.
    pub fn remove_path(&self, key: &str) -> EngineResult<bool> {
        let dir_prefix = format!("{key}/");
        self.pending
            .lock()
            .retain(|pending| pending != key && !pending.starts_with(&dir_prefix));
        self.mark_deleted(key);

        let targets: Vec<String> = {
            let index = self.index.read();
            if index.is_indexed(key) {
                vec![key.to_string()]
            } else {
                index
                    .indexed_paths()
                    .into_iter()
                    .filter(|path| path.starts_with(&dir_prefix))
                    .collect()
            }
        };

        if targets.is_empty() {
            // Never indexed, but a stale cache record may exist
            self.cache.delete(Path::new(key))?;
            return Ok(false);
        }

        for target in &targets {
            self.remove_document(target)?;
            debug!(path = %target, "document removed");
        }
        Ok(true)
    }
}
