//! Workspace traversal and document filtering
//!
//! This module decides which files are documents:
//! - include globs (markdown and plain text by default)
//! - exclude globs from configuration
//! - .gitignore rules and `.semdexignore` files
//! - the index directory and `.git/` are never documents

use crate::{EngineError, EngineResult};
use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use std::path::{Path, PathBuf};

/// Per-directory ignore file, same syntax as .gitignore.
pub const IGNORE_FILE_NAME: &str = ".semdexignore";

/// Default document globs.
pub fn default_include() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.txt".to_string(),
    ]
}

/// Walks the workspace and filters watcher events with the same rules.
#[derive(Debug, Clone)]
pub struct WorkspaceWalker {
    root: PathBuf,
    overrides: Override,
}

impl WorkspaceWalker {
    /// Build the walker for `root`.
    ///
    /// `index_dir` is excluded when it lies inside the workspace.
    pub fn new(
        root: &Path,
        include: &[String],
        exclude: &[String],
        index_dir: &Path,
    ) -> EngineResult<Self> {
        let mut builder = OverrideBuilder::new(root);
        let invalid = |glob: &str, e: ignore::Error| {
            EngineError::Config(format!("invalid glob pattern '{glob}': {e}"))
        };

        for glob in include {
            builder.add(glob).map_err(|e| invalid(glob, e))?;
        }
        for glob in exclude {
            let negated = format!("!{glob}");
            builder.add(&negated).map_err(|e| invalid(glob, e))?;
        }

        builder.add("!/.git/").map_err(|e| invalid(".git/", e))?;
        let index_rel = if index_dir.is_absolute() {
            index_dir.strip_prefix(root).ok().map(Path::to_path_buf)
        } else {
            Some(index_dir.to_path_buf())
        };
        if let Some(rel) = index_rel.filter(|rel| !rel.as_os_str().is_empty()) {
            let glob = format!("!/{}/", rel.to_string_lossy().replace('\\', "/"));
            builder.add(&glob).map_err(|e| invalid(&glob, e))?;
        }

        let overrides = builder
            .build()
            .map_err(|e| EngineError::Config(format!("invalid document globs: {e}")))?;

        Ok(Self {
            root: root.to_path_buf(),
            overrides,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` (absolute, or relative to the root) is a document.
    ///
    /// Applies the glob rules only; ignore files are consulted by [`walk`](Self::walk).
    pub fn accepts(&self, path: &Path) -> bool {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let Ok(relative) = absolute.strip_prefix(&self.root) else {
            return false;
        };

        // An excluded ancestor directory excludes everything below it
        let mut ancestor = self.root.clone();
        let components: Vec<_> = relative.components().collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            ancestor.push(component);
            if self.overrides.matched(&ancestor, true).is_ignore() {
                return false;
            }
        }

        self.overrides.matched(&absolute, false).is_whitelist()
    }

    /// Every document in the workspace.
    ///
    /// The globs filter results instead of being installed as walker
    /// overrides: an override whitelist would take precedence over
    /// `.gitignore` and `.semdexignore` rules.
    pub fn walk(&self) -> impl Iterator<Item = PathBuf> + use<> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);
        builder.add_custom_ignore_filename(IGNORE_FILE_NAME);

        let dir_rules = self.overrides.clone();
        builder.filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir && dir_rules.matched(entry.path(), true).is_ignore())
        });

        let file_rules = self.overrides.clone();
        builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(move |entry| file_rules.matched(entry.path(), false).is_whitelist())
            .map(|entry| entry.into_path())
    }
}
