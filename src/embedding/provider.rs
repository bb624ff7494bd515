/// Embedding provider trait and bundled implementations
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ProviderError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Timeout(_) | ProviderError::Unavailable(_)
        )
    }
}

/// Trait for embedding providers
///
/// Implementations return exactly one vector of `dimension()` floats per input
/// text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model identifier (part of every cache key)
    fn model_id(&self) -> &str;
}

/// Approximate token count used for rate limiting and context budgets
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Deterministic feature-hashing embedder
///
/// Lowercased alphanumeric words are hashed with BLAKE3 into `dimension`
/// signed buckets and the result is L2-normalized. Texts sharing words end up
/// close in cosine space, which is enough for offline use and tests. No model
/// download, no network.
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_id: format!("hash-embedder-{}", dimension.max(1)),
        }
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut any = false;

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[(bucket % self.dimension as u64) as usize] += sign;
            any = true;
        }

        if !any {
            return Err(ProviderError::InvalidInput(
                "Text contains no words".to_string(),
            ));
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(feature = "local-models")]
pub use local::FastEmbedProvider;

#[cfg(feature = "local-models")]
mod local {
    use super::{EmbeddingProvider, ProviderError};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Arc;

    /// FastEmbed provider for local embedding generation
    ///
    /// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
    /// on first use. The smallest model (all-MiniLM-L6-v2) is ~90MB.
    pub struct FastEmbedProvider {
        model: Arc<TextEmbedding>,
        model_name: String,
        dimension: usize,
    }

    impl FastEmbedProvider {
        pub fn new(model_name: &str) -> Result<Self, ProviderError> {
            let (embedding_model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
                _ => {
                    return Err(ProviderError::InitializationError(format!(
                        "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        model_name
                    )));
                }
            };

            tracing::info!("Initializing embedding model: {} ({}D)", model_name, dimension);

            let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
            let model = TextEmbedding::try_new(init_options)
                .map_err(|e| ProviderError::InitializationError(e.to_string()))?;

            Ok(Self {
                model: Arc::new(model),
                model_name: model_name.to_string(),
                dimension,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, None))
                .await
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?
                .map_err(|e| ProviderError::GenerationError(e.to_string()))?;

            if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
                return Err(ProviderError::DimensionMismatch {
                    expected: self.dimension,
                    actual: bad.len(),
                });
            }

            Ok(embeddings)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_id(&self) -> &str {
            &self.model_name
        }
    }
}
