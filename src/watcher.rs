//! Filesystem watcher feeding the change coordinator
//!
//! Watches the whole workspace recursively and translates raw notify events
//! into [`ChangeEvent`]s:
//! - document edits, creations and renames become per-path events
//! - removals are forwarded unfiltered so deleted directories are handled
//! - writes to `.git/HEAD`, `.git/index` or `.git/refs/` become `GitStateChanged`
//! - everything under the index directory is ignored

use crate::coordinator::{ChangeCoordinator, ChangeEvent};
use crate::walker::WorkspaceWalker;
use crate::{EngineError, EngineResult};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches the workspace root for document changes.
pub struct WorkspaceWatcher {
    walker: WorkspaceWalker,
    index_dir: PathBuf,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    /// Kept alive for as long as events are wanted
    _watcher: RecommendedWatcher,
}

impl WorkspaceWatcher {
    /// Start watching `walker.root()` recursively.
    ///
    /// `index_dir` is absolute or relative to the root.
    pub fn new(walker: WorkspaceWalker, index_dir: &Path) -> EngineResult<Self> {
        let (tx, rx) = mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The callback runs on notify's own thread
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| EngineError::Config(format!("failed to create file watcher: {e}")))?;

        watcher
            .watch(walker.root(), RecursiveMode::Recursive)
            .map_err(|e| {
                EngineError::Config(format!(
                    "cannot watch {}: {e}",
                    walker.root().display()
                ))
            })?;

        let index_dir = if index_dir.is_absolute() {
            index_dir.to_path_buf()
        } else {
            walker.root().join(index_dir)
        };

        Ok(Self {
            walker,
            index_dir,
            event_rx: rx,
            _watcher: watcher,
        })
    }

    /// Forward events to `coordinator` until `shutdown` is cancelled.
    pub async fn run(mut self, coordinator: ChangeCoordinator, shutdown: CancellationToken) {
        info!(root = %self.walker.root().display(), "watching workspace");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.event_rx.recv() => match received {
                    Some(Ok(event)) => {
                        for change in classify(&self.walker, &self.index_dir, &event) {
                            debug!(?change, "filesystem change");
                            coordinator.handle(change);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "file watch error"),
                    None => break,
                },
            }
        }

        info!("workspace watcher stopped");
    }
}

/// Path of `path` inside `.git/` when it lies in the workspace's git dir.
fn git_relative<'a>(root: &Path, path: &'a Path) -> Option<&'a Path> {
    path.strip_prefix(root).ok()?.strip_prefix(".git").ok()
}

fn is_git_state_file(inside_git: &Path) -> bool {
    let mut components = inside_git.components();
    match components.next() {
        Some(Component::Normal(first)) => {
            first == "refs"
                || ((first == "HEAD" || first == "index") && components.next().is_none())
        }
        _ => false,
    }
}

/// Translate one notify event.
pub fn classify(walker: &WorkspaceWalker, index_dir: &Path, event: &Event) -> Vec<ChangeEvent> {
    let mut changes = Vec::new();
    let mut push = |change: ChangeEvent| {
        if !changes.contains(&change) {
            changes.push(change);
        }
    };

    let rename_pair = matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    ) && event.paths.len() == 2;

    for (position, path) in event.paths.iter().enumerate() {
        if path.starts_with(index_dir) {
            continue;
        }
        if let Some(inside_git) = git_relative(walker.root(), path) {
            let mutating = !matches!(event.kind, EventKind::Access(_));
            if mutating && is_git_state_file(inside_git) {
                push(ChangeEvent::GitStateChanged);
            }
            continue;
        }

        let path = path.clone();
        match event.kind {
            EventKind::Remove(_) => push(ChangeEvent::Deleted(path)),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                push(ChangeEvent::Deleted(path))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if rename_pair && position == 0 => {
                push(ChangeEvent::Deleted(path))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)) if !path.exists() => {
                push(ChangeEvent::Deleted(path))
            }
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                if walker.accepts(&path) =>
            {
                push(ChangeEvent::Created(path))
            }
            EventKind::Modify(_) if walker.accepts(&path) => push(ChangeEvent::Changed(path)),
            _ => {}
        }
    }

    changes
}
