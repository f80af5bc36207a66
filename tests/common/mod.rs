//! Shared fixtures for integration tests.
//!
//! Everything runs on the hashing backend so no model is downloaded.

#![allow(dead_code)]

use semdex::embedding::{EmbedMode, EmbeddingBackend, HashingBackend, Token, TokenCodec};
use semdex::{Engine, EngineResult, Settings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn add_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.dir.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    pub fn remove_file(&self, path: &str) {
        fs::remove_file(self.dir.path().join(path)).expect("Failed to remove file");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Settings tuned for tests: hashing model, short timers, small chunks.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.workspace_root = Some(self.dir.path().to_path_buf());
        settings.embedding.model = "hashing".to_string();
        settings.embedding.hashing_dimension = 256;
        settings.embedding.window_tokens = 64;
        settings.embedding.overlap_tokens = 8;
        settings.index.similarity_floor = 0.3;
        settings.index.persist_debounce_ms = 50;
        settings.watch.debounce_ms = 50;
        settings
    }

    /// Cache record location for a workspace-relative document path.
    pub fn cache_record(&self, rel: &str) -> PathBuf {
        let mut parts: Vec<&str> = rel.split('/').collect();
        let leaf = parts.pop().unwrap();
        let mut path = self.dir.path().join(".semdex").join("cache");
        for dir in parts {
            path.push(format!("{dir}.d"));
        }
        path.push(format!("{leaf}.json"));
        path
    }

    /// Open and initialize an engine on the hashing backend.
    pub async fn engine(&self) -> Engine {
        let engine = Engine::open(self.settings()).expect("Failed to open engine");
        engine.init().await.expect("Failed to init engine");
        engine
    }

    /// Open and initialize an engine whose embed calls are counted.
    pub async fn counting_engine(&self) -> (Engine, Arc<AtomicUsize>) {
        let backend = CountingBackend::new(256);
        let calls = Arc::clone(&backend.calls);
        let engine = Engine::with_backend(self.settings(), Arc::new(backend))
            .expect("Failed to open engine");
        engine.init().await.expect("Failed to init engine");
        (engine, calls)
    }
}

/// Hashing backend that counts `embed` calls.
pub struct CountingBackend {
    inner: HashingBackend,
    pub calls: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingBackend::new(dimension),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl TokenCodec for CountingBackend {
    fn tokenize(&self, text: &str) -> EngineResult<Vec<Token>> {
        self.inner.tokenize(text)
    }
}

impl EmbeddingBackend for CountingBackend {
    fn init(&self) -> EngineResult<()> {
        self.inner.init()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    fn embed(&self, text: &str, mode: EmbedMode) -> EngineResult<Vec<f32>> {
        if mode == EmbedMode::Document {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.embed(text, mode)
    }

    fn uses_task_prefixes(&self) -> bool {
        self.inner.uses_task_prefixes()
    }
}

pub const RUST_NOTE: &str = "---\ntitle: Ownership\n---\n# Ownership\n\nRust ownership rules: every value has a single owner, borrowing lends references, lifetimes bound borrows.\n";

pub const COOKING_NOTE: &str = "# Pasta\n\nBoil pasta in salted water. Simmer tomato sauce with garlic and basil.\n";

pub const GARDEN_NOTE: &str = "# Garden\n\nWater tomato seedlings every morning and mulch the raised beds.\n";
