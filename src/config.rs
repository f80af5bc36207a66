//! Configuration module for the semantic search engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.semdex/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SEMDEX_` and use double
//! underscores to separate nested levels:
//! - `SEMDEX_EMBEDDING__MODEL=hashing` sets `embedding.model`
//! - `SEMDEX_INDEX__SIMILARITY_FLOOR=0.4` sets `index.similarity_floor`
//! - `SEMDEX_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`

use crate::embedding::{
    DEFAULT_DOCUMENT_PREFIX, DEFAULT_OVERLAP_TOKENS, DEFAULT_QUERY_PREFIX, DEFAULT_WINDOW_TOKENS,
};
use crate::walker::{IGNORE_FILE_NAME, default_include};
use crate::{EngineError, EngineResult};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-workspace directory holding settings, cache and snapshot.
pub const INDEX_DIR_NAME: &str = ".semdex";

/// Settings file name inside the index directory.
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Index directory, relative to the workspace root unless absolute
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Workspace root directory (where .semdex is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Embedding model and scheduling
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index and search
    #[serde(default)]
    pub index: IndexConfig,

    /// File watching and batching
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name, or "hashing" for the offline backend
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_document_prefix")]
    pub document_prefix: String,

    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    /// Chunk window in tokens
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,

    /// Tokens shared by consecutive chunks
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    /// Deadline for one indexing task
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Deadline for embedding a query
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Embedding calls allowed to run at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Where model files are downloaded (defaults to the user cache dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Vector size of the hashing backend
    #[serde(default = "default_hashing_dimension")]
    pub hashing_dimension: usize,

    /// Draw a progress bar while the model downloads. Set by the CLI, never read from config
    #[serde(skip)]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Minimum cosine similarity for a search hit
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    /// Results returned when the caller gives no limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Quiet period before the snapshot is written
    #[serde(default = "default_debounce_ms")]
    pub persist_debounce_ms: u64,

    /// Maximum snippet length in characters
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Follow filesystem changes in `watch` and `serve`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quiet period before a batch of edits is re-indexed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Documents re-indexed concurrently per batch
    #[serde(default = "default_watch_concurrency")]
    pub concurrency: usize,

    /// Globs selecting documents
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Globs excluded on top of ignore files
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Rescan the workspace after checkouts and resets
    #[serde(default = "default_true")]
    pub git_rescan: bool,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_dir() -> PathBuf {
    PathBuf::from(INDEX_DIR_NAME)
}
fn default_true() -> bool {
    true
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_document_prefix() -> String {
    DEFAULT_DOCUMENT_PREFIX.to_string()
}
fn default_query_prefix() -> String {
    DEFAULT_QUERY_PREFIX.to_string()
}
fn default_window_tokens() -> usize {
    DEFAULT_WINDOW_TOKENS
}
fn default_overlap_tokens() -> usize {
    DEFAULT_OVERLAP_TOKENS
}
fn default_task_timeout_ms() -> u64 {
    30_000
}
fn default_query_timeout_ms() -> u64 {
    10_000
}
fn default_concurrency() -> usize {
    1
}
fn default_hashing_dimension() -> usize {
    384
}
fn default_similarity_floor() -> f32 {
    0.5
}
fn default_limit() -> usize {
    10
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_snippet_chars() -> usize {
    300
}
fn default_watch_concurrency() -> usize {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_dir: default_index_dir(),
            workspace_root: None,
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            document_prefix: default_document_prefix(),
            query_prefix: default_query_prefix(),
            window_tokens: default_window_tokens(),
            overlap_tokens: default_overlap_tokens(),
            task_timeout_ms: default_task_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            concurrency: default_concurrency(),
            cache_dir: None,
            hashing_dimension: default_hashing_dimension(),
            show_download_progress: false,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            default_limit: default_limit(),
            persist_debounce_ms: default_debounce_ms(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
            concurrency: default_watch_concurrency(),
            include: default_include(),
            exclude: Vec::new(),
            git_rescan: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Environment layer: `SEMDEX_A__B=v` sets `a.b`.
fn env_provider() -> Env {
    Env::prefixed("SEMDEX_").map(|key| {
        key.as_str()
            .to_lowercase()
            .replace("__", ".") // Double underscore becomes dot
            .into()
    })
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .semdex directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(INDEX_DIR_NAME).join(SETTINGS_FILE_NAME));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                // If workspace_root is not set in config, detect it
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration for an explicit workspace root
    pub fn load_for_root(root: &Path) -> Result<Self, Box<figment::Error>> {
        let config_path = root.join(INDEX_DIR_NAME).join(SETTINGS_FILE_NAME);
        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                settings.workspace_root = Some(root.to_path_buf());
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with SEMDEX_ prefix
            .merge(env_provider())
    }

    /// Find the workspace config by looking for a .semdex directory
    /// Searches from current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(INDEX_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Get the workspace root directory (where .semdex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(INDEX_DIR_NAME).is_dir())
            .map(Path::to_path_buf)
    }

    /// Workspace root, falling back to the current directory
    pub fn root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    /// Absolute index directory
    pub fn index_dir_path(&self) -> PathBuf {
        if self.index_dir.is_absolute() {
            self.index_dir.clone()
        } else {
            self.root().join(&self.index_dir)
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        let embedding = &self.embedding;
        if embedding.window_tokens == 0 || embedding.overlap_tokens >= embedding.window_tokens {
            return Err(EngineError::InvalidChunking {
                window: embedding.window_tokens,
                overlap: embedding.overlap_tokens,
            });
        }
        if embedding.task_timeout_ms == 0 || embedding.query_timeout_ms == 0 {
            return Err(EngineError::Config(
                "embedding timeouts must be greater than zero".to_string(),
            ));
        }
        if embedding.concurrency == 0 || self.watch.concurrency == 0 {
            return Err(EngineError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if embedding.hashing_dimension == 0 {
            return Err(EngineError::Config(
                "embedding.hashing_dimension must be at least 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.index.similarity_floor) {
            return Err(EngineError::Config(format!(
                "index.similarity_floor {} is outside [-1, 1]",
                self.index.similarity_floor
            )));
        }
        if self.watch.include.is_empty() {
            return Err(EngineError::Config(
                "watch.include needs at least one glob".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| EngineError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(root: &Path, force: bool) -> EngineResult<PathBuf> {
        let config_path = root.join(INDEX_DIR_NAME).join(SETTINGS_FILE_NAME);

        if !force && config_path.exists() {
            return Err(EngineError::Config(
                "Configuration file already exists. Use --force to overwrite".to_string(),
            ));
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let template = format!(
            r#"# semdex configuration file

# Version of the configuration schema
version = 1

# Index directory (relative to the workspace root)
index_dir = "{INDEX_DIR_NAME}"

[embedding]
# fastembed model name, or "hashing" for a fully offline bag-of-words model
model = "AllMiniLML6V2"

# Prefixes for asymmetric retrieval models
document_prefix = "{DEFAULT_DOCUMENT_PREFIX}"
query_prefix = "{DEFAULT_QUERY_PREFIX}"

# Chunking in model tokens (overlap must be smaller than the window)
window_tokens = {DEFAULT_WINDOW_TOKENS}
overlap_tokens = {DEFAULT_OVERLAP_TOKENS}

# Per-task deadlines in milliseconds
task_timeout_ms = 30000
query_timeout_ms = 10000

# Embedding calls running at once
concurrency = 1

[index]
# Minimum cosine similarity for a result (-1.0 to 1.0)
similarity_floor = 0.5
default_limit = 10

# Quiet period before the index snapshot is written
persist_debounce_ms = 1000

# Maximum snippet length in characters
snippet_chars = 300

[watch]
enabled = true

# Quiet period before a batch of edits is re-indexed
debounce_ms = 1000

# Documents re-indexed concurrently
concurrency = 5

include = ["**/*.md", "**/*.markdown", "**/*.txt"]
exclude = []

# Rescan after git checkouts and resets
git_rescan = true
"#
        );

        std::fs::write(&config_path, template).map_err(|e| EngineError::FileWrite {
            path: config_path.clone(),
            source: e,
        })?;

        Self::create_default_ignore_file(root, force)?;
        Ok(config_path)
    }

    /// Create a default .semdexignore file
    fn create_default_ignore_file(root: &Path, force: bool) -> EngineResult<()> {
        let ignore_path = root.join(IGNORE_FILE_NAME);
        if !force && ignore_path.exists() {
            return Ok(());
        }

        let default_content = r#"# semdex ignore patterns (gitignore syntax)
# https://git-scm.com/docs/gitignore

# Dependency and build directories
node_modules/
target/
vendor/
dist/
build/

# Changelogs rarely answer questions
# CHANGELOG.md
"#;

        std::fs::write(&ignore_path, default_content).map_err(|e| EngineError::FileWrite {
            path: ignore_path,
            source: e,
        })
    }
}
