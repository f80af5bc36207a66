//! fastembed-backed embedding model.
//!
//! Loads an ONNX sentence-embedding model through fastembed. The model's own
//! tokenizer is reused for chunking with truncation switched off, so token
//! windows see the whole document. Token spans come from the tokenizer's
//! offsets. Inputs longer than the model's position limit are cut at a token
//! boundary before inference.

use crate::embedding::backend::{EmbedMode, EmbeddingBackend, Token, TokenCodec};
use crate::{EngineError, EngineResult};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Sequence length the supported models were trained with.
const MODEL_MAX_LENGTH: usize = 512;

/// Room for the `[CLS]` and `[SEP]` special tokens.
const SPECIAL_TOKENS: usize = 2;

/// Resolve a configured model name to a fastembed model.
pub fn parse_model_name(name: &str) -> EngineResult<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "NomicEmbedTextV15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(EngineError::Config(format!(
            "unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML12V2, \
             BGESmallENV15, BGEBaseENV15, NomicEmbedTextV15, MultilingualE5Small, hashing"
        ))),
    }
}

struct LoadedModel {
    model: Mutex<TextEmbedding>,
    dimension: usize,
}

/// Embedding backend wrapping a fastembed [`TextEmbedding`].
pub struct FastEmbedBackend {
    model_name: String,
    model: EmbeddingModel,
    cache_dir: PathBuf,
    show_download_progress: bool,
    loaded: OnceLock<LoadedModel>,
    load_lock: Mutex<()>,
}

impl std::fmt::Debug for FastEmbedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedBackend")
            .field("model_name", &self.model_name)
            .field("cache_dir", &self.cache_dir)
            .field("show_download_progress", &self.show_download_progress)
            .field("loaded", &self.loaded.get().is_some())
            .finish()
    }
}

impl FastEmbedBackend {
    /// Create an unloaded backend. Nothing is downloaded until [`init`](EmbeddingBackend::init).
    pub fn new(model_name: &str, cache_dir: PathBuf) -> EngineResult<Self> {
        Ok(Self {
            model_name: model_name.to_string(),
            model: parse_model_name(model_name)?,
            cache_dir,
            show_download_progress: false,
            loaded: OnceLock::new(),
            load_lock: Mutex::new(()),
        })
    }

    /// Show fastembed's download progress bar on first load.
    pub fn with_download_progress(mut self, show: bool) -> Self {
        self.show_download_progress = show;
        self
    }

    fn loaded(&self) -> EngineResult<&LoadedModel> {
        self.loaded.get().ok_or(EngineError::ModelNotReady)
    }

    fn load(&self) -> EngineResult<LoadedModel> {
        let has_cached_models = self.cache_dir.exists()
            && self
                .cache_dir
                .read_dir()
                .is_ok_and(|mut entries| entries.any(|_| true));

        if has_cached_models {
            info!(model = %self.model_name, "loading embedding model from cache");
        } else {
            info!(model = %self.model_name, "downloading embedding model (first time only)");
        }

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(self.model.clone())
                .with_cache_dir(self.cache_dir.clone())
                .with_show_download_progress(self.show_download_progress),
        )
        .map_err(|e| EngineError::Embedding(format!("failed to initialize model: {e}")))?;

        // Chunking needs token ids for the whole document
        text_model
            .tokenizer
            .with_truncation(None)
            .map_err(|e| EngineError::Embedding(format!("failed to configure tokenizer: {e}")))?;

        // Get dimensions by generating a test embedding
        let sample = text_model
            .embed(vec!["dimension check"], None)
            .map_err(|e| EngineError::Embedding(e.to_string()))?;
        let dimension = sample
            .into_iter()
            .next()
            .map(|v| v.len())
            .ok_or_else(|| EngineError::Embedding("model returned no embedding".into()))?;

        debug!(model = %self.model_name, dimension, "embedding model ready");

        Ok(LoadedModel {
            model: Mutex::new(text_model),
            dimension,
        })
    }
}

impl TokenCodec for FastEmbedBackend {
    fn tokenize(&self, text: &str) -> EngineResult<Vec<Token>> {
        let loaded = self.loaded()?;
        let model = loaded.model.lock();
        let encoding = model
            .tokenizer
            .encode(text, false)
            .map_err(|e| EngineError::Embedding(format!("tokenization failed: {e}")))?;
        Ok(encoding
            .get_ids()
            .iter()
            .zip(encoding.get_offsets())
            .map(|(&id, &(start, end))| Token {
                id,
                span: start..end,
            })
            .collect())
    }
}

impl EmbeddingBackend for FastEmbedBackend {
    fn init(&self) -> EngineResult<()> {
        if self.loaded.get().is_some() {
            return Ok(());
        }
        let _guard = self.load_lock.lock();
        if self.loaded.get().is_none() {
            let loaded = self.load()?;
            let _ = self.loaded.set(loaded);
        }
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> Option<usize> {
        self.loaded.get().map(|loaded| loaded.dimension)
    }

    fn embed(&self, text: &str, _mode: EmbedMode) -> EngineResult<Vec<f32>> {
        let loaded = self.loaded()?;
        let mut model = loaded.model.lock();

        let limit = MODEL_MAX_LENGTH - SPECIAL_TOKENS;
        let encoding = model
            .tokenizer
            .encode(text, false)
            .map_err(|e| EngineError::Embedding(format!("tokenization failed: {e}")))?;
        let input = match encoding.get_offsets().get(limit - 1) {
            Some(&(_, end)) if encoding.get_ids().len() > limit => text
                .get(..end)
                .ok_or_else(|| {
                    EngineError::Embedding(format!("token offset {end} is not a char boundary"))
                })?
                .to_string(),
            _ => text.to_string(),
        };

        let embeddings = model
            .embed(vec![input], None)
            .map_err(|e| EngineError::Embedding(format!("failed to generate embedding: {e}")))?;

        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("model returned no embedding".into()))?;

        if embedding.len() != loaded.dimension {
            return Err(EngineError::Embedding(format!(
                "embedding dimension mismatch: expected {}, got {}",
                loaded.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}
