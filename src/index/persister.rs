//! Debounced snapshot writer.
//!
//! Every mutation calls [`DebouncedPersister::schedule`], which cancels any
//! armed timer and arms a new one. A burst of changes therefore produces a
//! single write once the index has been quiet for the debounce window.
//! Writes run on the blocking pool, one at a time; a flush waits for a write
//! already in progress.

use super::{IndexSnapshot, SharedIndex};
use crate::EngineResult;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct PersistTarget {
    index: SharedIndex,
    path: PathBuf,
    model_id: String,
    dirty: AtomicBool,
    writes: AtomicUsize,
    write_lock: Mutex<()>,
}

impl PersistTarget {
    fn write_now(&self) -> EngineResult<()> {
        // Capture under the read lock, write after releasing it
        let snapshot = {
            let index = self.index.read();
            IndexSnapshot::capture(&index, &self.model_id)?
        };
        snapshot.write(&self.path)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn persist_if_dirty(&self) -> EngineResult<()> {
        let _writing = self.write_lock.lock();
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.write_now().inspect_err(|_| {
            // Stay dirty so the next window or the final flush retries
            self.dirty.store(true, Ordering::SeqCst);
        })
    }
}

pub struct DebouncedPersister {
    target: Arc<PersistTarget>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DebouncedPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedPersister")
            .field("path", &self.target.path)
            .field("delay", &self.delay)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl DebouncedPersister {
    pub fn new(index: SharedIndex, path: PathBuf, model_id: &str, delay: Duration) -> Self {
        Self {
            target: Arc::new(PersistTarget {
                index,
                path,
                model_id: model_id.to_string(),
                dirty: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
                write_lock: Mutex::new(()),
            }),
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.target.path
    }

    /// Mark the index dirty and (re)arm the write timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self) {
        self.target.dirty.store(true, Ordering::SeqCst);

        let target = Arc::clone(&self.target);
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let path = target.path.clone();
            // Aborting the timer from here on leaves the write running to completion
            match tokio::task::spawn_blocking(move || target.persist_if_dirty()).await {
                Ok(Ok(())) => debug!(path = %path.display(), "debounced index persist"),
                Ok(Err(e)) => warn!(
                    path = %path.display(),
                    error = %e,
                    "index persist failed, will retry on the next change"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "index persist task failed"),
            }
        });

        if let Some(previous) = self.pending.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Cancel the timer and write now if anything is unsaved.
    ///
    /// Blocks until a debounced write already in progress has finished.
    pub fn flush(&self) -> EngineResult<()> {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
        self.target.persist_if_dirty()
    }

    pub fn is_dirty(&self) -> bool {
        self.target.dirty.load(Ordering::SeqCst)
    }

    /// Number of snapshots written so far.
    pub fn writes(&self) -> usize {
        self.target.writes.load(Ordering::SeqCst)
    }
}

impl Drop for DebouncedPersister {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.get_mut().take() {
            pending.abort();
        }
    }
}
