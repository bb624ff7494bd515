//! Cross-encoder reranking

use super::SearchResult;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Reranker unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranker returned {actual} scores for {expected} candidates")]
    ScoreCountMismatch { expected: usize, actual: usize },
}

/// External cross-encoder
///
/// Scores each (query, content) pair directly; one score per content, in
/// input order. No tie-break guarantee.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, contents: &[String]) -> Result<Vec<f32>, RerankError>;
}

/// Replace candidate scores with reranker scores, sort and keep `top_k`
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    mut candidates: Vec<SearchResult>,
    top_k: usize,
) -> Result<Vec<SearchResult>, RerankError> {
    if candidates.is_empty() {
        return Ok(candidates);
    }
    if query.trim().is_empty() {
        return Err(RerankError::InvalidInput(
            "Query cannot be empty".to_string(),
        ));
    }

    let contents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
    let scores = reranker.score(query, &contents).await?;
    if scores.len() != candidates.len() {
        return Err(RerankError::ScoreCountMismatch {
            expected: candidates.len(),
            actual: scores.len(),
        });
    }

    for (candidate, score) in candidates.iter_mut().zip(scores) {
        candidate.score = score;
    }
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(top_k);

    Ok(candidates)
}

#[cfg(feature = "local-models")]
pub use local::FastEmbedReranker;

#[cfg(feature = "local-models")]
mod local {
    use super::{RerankError, Reranker};
    use async_trait::async_trait;
    use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
    use std::sync::Arc;

    /// Local cross-encoder via FastEmbed
    pub struct FastEmbedReranker {
        model: Arc<TextRerank>,
        model_name: String,
    }

    impl FastEmbedReranker {
        /// Create a reranker with the specified model
        ///
        /// # Arguments
        /// * `model_name` - `bge-reranker-base` or `jina-reranker-v1-turbo-en`
        pub fn new(model_name: &str) -> Result<Self, RerankError> {
            let model = match model_name {
                "bge-reranker-base" | "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
                "jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
                other => {
                    return Err(RerankError::InitializationError(format!(
                        "Unsupported reranker model: {}",
                        other
                    )))
                }
            };

            tracing::info!("Initializing reranker model: {}", model_name);

            let init_options = RerankInitOptions::new(model).with_show_download_progress(true);
            let model = TextRerank::try_new(init_options)
                .map_err(|e| RerankError::InitializationError(e.to_string()))?;

            Ok(Self {
                model: Arc::new(model),
                model_name: model_name.to_string(),
            })
        }

        pub fn with_default_model() -> Result<Self, RerankError> {
            Self::new("bge-reranker-base")
        }

        pub fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    #[async_trait]
    impl Reranker for FastEmbedReranker {
        async fn score(&self, query: &str, contents: &[String]) -> Result<Vec<f32>, RerankError> {
            if contents.is_empty() {
                return Ok(Vec::new());
            }

            let model = Arc::clone(&self.model);
            let query = query.to_string();
            let contents = contents.to_vec();
            let count = contents.len();

            let results = tokio::task::spawn_blocking(move || {
                let documents: Vec<&str> = contents.iter().map(String::as_str).collect();
                model.rerank(query.as_str(), documents, false, None)
            })
            .await
            .map_err(|e| RerankError::Unavailable(e.to_string()))?
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

            // Results come back sorted by score; restore input order
            let mut scores = vec![f32::NEG_INFINITY; count];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score;
                }
            }
            Ok(scores)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;

    /// Scores by content length
    struct LengthReranker;

    #[async_trait]
    impl Reranker for LengthReranker {
        async fn score(&self, _query: &str, contents: &[String]) -> Result<Vec<f32>, RerankError> {
            Ok(contents.iter().map(|c| c.len() as f32).collect())
        }
    }

    struct ShortReranker;

    #[async_trait]
    impl Reranker for ShortReranker {
        async fn score(&self, _query: &str, _contents: &[String]) -> Result<Vec<f32>, RerankError> {
            Ok(vec![1.0])
        }
    }

    fn candidate(id: &str, content: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            content: content.to_string(),
            score,
            chunk_index: 0,
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_rerank_ignores_upstream_scores() {
        let candidates = vec![
            candidate("short", "ab", 0.99),
            candidate("long", "abcdefgh", 0.01),
            candidate("mid", "abcd", 0.5),
        ];
        let ranked = rerank(&LengthReranker, "q", candidates, 2).await.unwrap();

        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["long", "mid"]);
        assert_eq!(ranked[0].score, 8.0);
    }

    #[tokio::test]
    async fn test_rerank_rejects_short_score_list() {
        let candidates = vec![candidate("a", "x", 0.1), candidate("b", "y", 0.2)];
        let err = rerank(&ShortReranker, "q", candidates, 2).await.unwrap_err();
        assert!(matches!(err, RerankError::ScoreCountMismatch { expected: 2, actual: 1 }));
    }

    #[tokio::test]
    async fn test_rerank_empty_candidates() {
        let ranked = rerank(&LengthReranker, "q", Vec::new(), 3).await.unwrap();
        assert!(ranked.is_empty());
    }
}
