//! Hybrid retrieval & context assembly
//!
//! Per query: embed → vector search (over-fetched) → keyword rescoring →
//! min-max hybrid fusion → optional cross-encoder rerank → token-bounded
//! context assembly with citations.

mod citations;
mod context;
mod deduplication;
mod engine;
mod fusion;
mod keyword;
mod reranker;

pub use citations::extract_citations;
pub use context::{assemble_context, excerpt};
pub use deduplication::deduplicate_results;
pub use engine::RetrievalEngine;
pub use fusion::{hybrid_fusion, min_max_normalize, FusionError, FusionWeights};
pub use keyword::{keyword_scores, query_terms};
#[cfg(feature = "local-models")]
pub use reranker::FastEmbedReranker;
pub use reranker::{rerank, RerankError, Reranker};

use crate::index::{ChunkMetadata, ScoredPoint, SearchFilter, VectorStoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid retrieval options: {0}")]
    InvalidOptions(String),

    #[error("Query embedding failed: {0}")]
    Embedding(String),

    #[error("Vector search failed: {0}")]
    VectorSearch(#[from] VectorStoreError),

    #[error("Reranking failed: {0}")]
    Rerank(#[from] RerankError),

    #[error("Reranking requested but no reranker is configured")]
    RerankerUnavailable,
}

impl From<FusionError> for RetrievalError {
    fn from(e: FusionError) -> Self {
        RetrievalError::InvalidOptions(e.to_string())
    }
}

/// One ranked candidate chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub score: f32,
    pub chunk_index: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl From<ScoredPoint> for SearchResult {
    fn from(point: ScoredPoint) -> Self {
        Self {
            chunk_id: point.id,
            document_id: point.payload.document_id,
            content: point.payload.content,
            score: point.score,
            chunk_index: point.payload.chunk_index,
            metadata: point.payload.metadata,
        }
    }
}

/// Provenance for one chunk placed in a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub document_title: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub relevance_score: f32,
    pub excerpt: String,
}

/// Terminal output of one query, ready for a generation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub query: String,
    pub context_text: String,
    /// Chunks in context order
    pub chunks: Vec<SearchResult>,
    pub citations: Vec<Citation>,
    pub total_tokens: usize,
    /// `hybrid` or `hybrid+rerank`
    pub strategy_tag: String,
}

impl RetrievalContext {
    /// Citations whose excerpts the answer actually draws on
    pub fn cited_by(&self, answer: &str) -> Vec<Citation> {
        extract_citations(answer, &self.citations)
    }

    /// Distinct document ids in context order
    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for chunk in &self.chunks {
            if !ids.contains(&chunk.document_id) {
                ids.push(chunk.document_id.clone());
            }
        }
        ids
    }
}

/// Per-query knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    /// Final number of candidates
    pub top_k: usize,
    /// Token budget for the assembled context
    pub max_tokens: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub rerank: bool,
    /// Vector search fetches `top_k * over_fetch` candidates
    pub over_fetch: usize,
    /// Citation excerpt length in characters
    pub excerpt_chars: usize,
    #[serde(default)]
    pub filter: Option<SearchFilter>,
    /// Read and write the query-result cache
    #[serde(skip)]
    pub use_cache: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_tokens: 4000,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            rerank: false,
            over_fetch: 4,
            excerpt_chars: 200,
            filter: None,
            use_cache: true,
        }
    }
}

impl RetrievalOptions {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}
