use std::path::{Path, PathBuf};
use std::sync::Arc;

use simdup_config::{DEFAULT_CANDLE_MODEL, EmbeddingProviderKind, EmbeddingsConfig, simdup_dir};
use thiserror::Error;

pub mod embedding;
mod engine;

pub use embedding::candle::{CANDLE_EMBEDDING_DIM, CandleEmbeddingModel};
pub use engine::{EmbeddingEngine, EngineInfo, canonical_text, l2_normalize};

pub const MOCK_MODEL_NAME: &str = "mock-hashed-tokens";

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("model config decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hf-hub request failed: {0}")]
    HfHub(#[from] hf_hub::api::sync::ApiError),
    #[error("candle model operation failed: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("tokenizer operation failed: {0}")]
    Tokenizer(String),
    #[error("invalid embedding response: {0}")]
    InvalidEmbeddingResponse(String),
    #[error("embedding model returned {actual} vectors for {expected} inputs")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("failed to lock shared resource: {0}")]
    LockPoisoned(String),
}

/// A tokenizer plus model pair that turns text into fixed-length vectors.
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Deterministic embeddings built from hashed word tokens.
///
/// Texts that share tokens share vector components, so identical texts map to
/// identical vectors. Used in tests and as the zero-download default.
#[derive(Debug, Clone, Copy)]
pub struct MockEmbeddingModel {
    dimension: usize,
}

impl MockEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for MockEmbeddingModel {
    fn default() -> Self {
        Self::new(simdup_config::DEFAULT_MOCK_DIMENSION)
    }
}

impl EmbeddingModel for MockEmbeddingModel {
    fn name(&self) -> &str {
        MOCK_MODEL_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| mock_embedding_for_text(text, self.dimension))
            .collect())
    }
}

/// Builds the configured model. Candle weights are fetched and loaded here, so
/// a missing or corrupt model fails before any symbol is processed.
pub fn load_embedding_model(
    workspace_root: impl AsRef<Path>,
    config: &EmbeddingsConfig,
) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
    match config.provider {
        EmbeddingProviderKind::Mock => Ok(Arc::new(MockEmbeddingModel::new(config.dimension))),
        EmbeddingProviderKind::Candle => {
            let repo = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_CANDLE_MODEL.to_owned());
            let model_dir = candle_model_dir(workspace_root.as_ref());
            Ok(Arc::new(CandleEmbeddingModel::load(model_dir, repo)?))
        }
    }
}

fn candle_model_dir(workspace_root: &Path) -> PathBuf {
    simdup_dir(workspace_root).join("models")
}

fn mock_embedding_for_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut embedding = vec![0.0f32; dimension];

    for token in tokenize_for_embedding(text) {
        let normalized = token.to_ascii_lowercase();
        let hash = fnv1a_64(normalized.as_bytes());
        let index = (hash as usize) % dimension;
        let sign = if ((hash >> 8) & 1) == 0 { 1.0 } else { -1.0 };
        embedding[index] += sign;
    }

    embedding
}

fn tokenize_for_embedding(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
