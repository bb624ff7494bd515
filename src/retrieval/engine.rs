//! Hybrid retrieval pipeline

use super::{
    assemble_context, deduplicate_results, hybrid_fusion, keyword_scores, rerank, FusionWeights,
    Reranker, RetrievalContext, RetrievalError, RetrievalOptions, SearchResult,
};
use crate::cache::RagCache;
use crate::embedding::{BatchEmbeddingProcessor, BatchMetadata, EmbeddingResult};
use crate::index::VectorStore;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Runs queries against one collection
///
/// Dependencies are injected once; the engine holds no per-query state, so
/// one instance serves any number of concurrent queries.
pub struct RetrievalEngine {
    embedder: Arc<BatchEmbeddingProcessor>,
    store: Arc<dyn VectorStore>,
    cache: Arc<RagCache>,
    reranker: Option<Arc<dyn Reranker>>,
    collection: String,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<BatchEmbeddingProcessor>,
        store: Arc<dyn VectorStore>,
        cache: Arc<RagCache>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            cache,
            reranker: None,
            collection: collection.into(),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Ranked candidates for `query`, before context assembly
    pub async fn search(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if options.top_k == 0 {
            return Err(RetrievalError::InvalidOptions(
                "top_k must be greater than zero".to_string(),
            ));
        }
        let weights = FusionWeights::new(options.vector_weight, options.keyword_weight)?;
        let reranker = match (options.rerank, &self.reranker) {
            (false, _) => None,
            (true, Some(r)) => Some(Arc::clone(r)),
            (true, None) => return Err(RetrievalError::RerankerUnavailable),
        };

        // Stage 1: query embedding (cache-checked)
        let started = Instant::now();
        let vector = self.embed_query(query).await?;
        debug!("Query embedded in {:?}", started.elapsed());

        // Stage 2: over-fetched vector search
        let started = Instant::now();
        let fetch_limit = options.top_k.saturating_mul(options.over_fetch.max(1));
        let hits = self
            .store
            .search(&self.collection, &vector, fetch_limit, options.filter.as_ref())
            .await?;
        let candidates =
            deduplicate_results(hits.into_iter().map(SearchResult::from).collect());
        debug!(
            "Vector search returned {} candidates in {:?}",
            candidates.len(),
            started.elapsed()
        );

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Stage 3: keyword rescoring over the candidate set
        let keyword = keyword_scores(query, &candidates);

        // Stage 4: min-max hybrid fusion
        let vector_scores: Vec<(String, f32)> = candidates
            .iter()
            .map(|c| (c.chunk_id.clone(), c.score))
            .collect();
        let fused = hybrid_fusion(&vector_scores, &keyword, weights);
        debug!(
            "Fused {} vector and {} keyword scores",
            vector_scores.len(),
            keyword.len()
        );

        let mut by_id: AHashMap<String, SearchResult> = candidates
            .into_iter()
            .map(|c| (c.chunk_id.clone(), c))
            .collect();
        let mut ranked: Vec<SearchResult> = fused
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|mut result| {
                    result.score = score;
                    result
                })
            })
            .collect();

        // Stage 5: optional rerank of the top 2k
        match reranker {
            Some(reranker) => {
                let started = Instant::now();
                ranked.truncate(options.top_k.saturating_mul(2));
                let reranked = rerank(reranker.as_ref(), query, ranked, options.top_k).await?;
                debug!("Reranked {} candidates in {:?}", reranked.len(), started.elapsed());
                Ok(reranked)
            }
            None => {
                ranked.truncate(options.top_k);
                Ok(ranked)
            }
        }
    }

    /// Full pipeline: ranked search plus token-bounded context assembly
    ///
    /// Results are cached per (query, options, model, collection) and tagged
    /// with every contributing document.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievalContext, RetrievalError> {
        let started = Instant::now();
        let cache_key = self.context_cache_key(query, options);

        if options.use_cache {
            if let Some(hit) = self.cache.get_query_result::<RetrievalContext>(&cache_key).await {
                debug!("Query result cache hit");
                return Ok(hit);
            }
        }

        let results = self.search(query, options).await?;
        let mut context = assemble_context(query.trim(), results, options.max_tokens, options.excerpt_chars);
        if options.rerank {
            context.strategy_tag = "hybrid+rerank".to_string();
        }

        if options.use_cache && !context.chunks.is_empty() {
            self.cache
                .set_query_result(&cache_key, &context, &context.document_ids())
                .await;
        }

        info!(
            "Retrieved {} chunks ({} tokens, {} citations) in {:?}",
            context.chunks.len(),
            context.total_tokens,
            context.citations.len(),
            started.elapsed()
        );

        Ok(context)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let metadata = BatchMetadata {
            label: Some("query".to_string()),
            document_id: None,
        };
        let output = self
            .embedder
            .process(&[query.to_string()], Some(&metadata))
            .await;

        match output.embeddings.into_iter().next() {
            Some(EmbeddingResult::Cached(v)) | Some(EmbeddingResult::Generated(v)) => Ok(v),
            Some(EmbeddingResult::Failed { error }) => Err(RetrievalError::Embedding(error)),
            Some(EmbeddingResult::Skipped) | None => Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            )),
        }
    }

    fn context_cache_key(&self, query: &str, options: &RetrievalOptions) -> String {
        let fingerprint = serde_json::to_string(options).unwrap_or_default();
        self.cache.query_key(
            &format!("{}\u{1f}{}", query.trim(), fingerprint),
            self.embedder.provider().model_id(),
            Some(&self.collection),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{BatchConfig, HashEmbedder};
    use crate::index::{
        ChunkMetadata, CollectionInfo, Distance, InMemoryVectorStore, Point, PointPayload,
        ScoredPoint, SearchFilter, VectorStoreError,
    };
    use crate::retrieval::RerankError;
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl VectorStore for DownStore {
        async fn create_collection(&self, _: &str, _: usize, _: Distance) -> Result<(), VectorStoreError> {
            Err(VectorStoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete_collection(&self, _: &str) -> Result<bool, VectorStoreError> {
            Err(VectorStoreError::Unavailable("connection refused".to_string()))
        }
        async fn describe(&self, _: &str) -> Result<Option<CollectionInfo>, VectorStoreError> {
            Err(VectorStoreError::Unavailable("connection refused".to_string()))
        }
        async fn upsert(&self, _: &str, _: Vec<Point>) -> Result<(), VectorStoreError> {
            Err(VectorStoreError::Unavailable("connection refused".to_string()))
        }
        async fn search(
            &self,
            _: &str,
            _: &[f32],
            _: usize,
            _: Option<&SearchFilter>,
        ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
            Err(VectorStoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete(&self, _: &str, _: &[String]) -> Result<usize, VectorStoreError> {
            Err(VectorStoreError::Unavailable("connection refused".to_string()))
        }
    }

    struct DownReranker;

    #[async_trait]
    impl Reranker for DownReranker {
        async fn score(&self, _: &str, _: &[String]) -> Result<Vec<f32>, RerankError> {
            Err(RerankError::Unavailable("timeout".to_string()))
        }
    }

    /// Prefers shorter content
    struct BrevityReranker;

    #[async_trait]
    impl Reranker for BrevityReranker {
        async fn score(&self, _: &str, contents: &[String]) -> Result<Vec<f32>, RerankError> {
            Ok(contents.iter().map(|c| 1.0 / c.len() as f32).collect())
        }
    }

    const DIM: usize = 128;

    fn embedder(cache: &Arc<RagCache>) -> Arc<BatchEmbeddingProcessor> {
        Arc::new(BatchEmbeddingProcessor::new(
            Arc::new(HashEmbedder::new(DIM)),
            Arc::clone(cache),
            BatchConfig::default(),
        ))
    }

    async fn seeded_engine() -> (RetrievalEngine, Arc<RagCache>) {
        let cache = Arc::new(RagCache::in_memory());
        let embedder = embedder(&cache);
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("docs", DIM, Distance::Cosine).await.unwrap();

        let chunks = [
            ("rust", 0, "Rust guarantees memory safety through ownership and borrowing."),
            ("rust", 1, "The borrow checker rejects data races at compile time."),
            ("bread", 0, "Sourdough bread needs a starter, flour and water."),
            ("bread", 1, "Bake the loaf in a hot dutch oven for forty minutes."),
        ];
        let texts: Vec<String> = chunks.iter().map(|(_, _, t)| t.to_string()).collect();
        let output = embedder.process(&texts, None).await;

        let points = chunks
            .iter()
            .zip(output.embeddings)
            .map(|((doc, idx, text), emb)| Point {
                id: format!("{}-{}", doc, idx),
                vector: emb.into_vector().unwrap(),
                payload: PointPayload {
                    document_id: doc.to_string(),
                    content: text.to_string(),
                    chunk_index: *idx,
                    metadata: ChunkMetadata::default(),
                },
            })
            .collect();
        store.upsert("docs", points).await.unwrap();

        let engine = RetrievalEngine::new(embedder, store, Arc::clone(&cache), "docs");
        (engine, cache)
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_document_first() {
        let (engine, _) = seeded_engine().await;
        let results = engine
            .search("memory safety ownership borrowing", &RetrievalOptions::default().with_top_k(2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "rust-0");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_retrieve_assembles_context_and_caches() {
        let (engine, cache) = seeded_engine().await;
        let options = RetrievalOptions::default().with_top_k(4);

        let context = engine.retrieve("borrow checker ownership", &options).await.unwrap();
        assert!(!context.chunks.is_empty());
        assert_eq!(context.strategy_tag, "hybrid");
        assert_eq!(context.chunks.len(), context.citations.len());
        assert!(context.total_tokens <= options.max_tokens);

        let writes = cache.stats().writes;
        let again = engine.retrieve("borrow checker ownership", &options).await.unwrap();
        assert_eq!(again, context);
        assert_eq!(cache.stats().writes, writes);

        // evicted once a contributing document changes
        let removed = cache.invalidate_by_document(&context.chunks[0].document_id).await;
        assert!(removed >= 2);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let (engine, _) = seeded_engine().await;
        let err = engine.search("   ", &RetrievalOptions::default()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_error() {
        let cache = Arc::new(RagCache::in_memory());
        let engine = RetrievalEngine::new(embedder(&cache), Arc::new(DownStore), cache, "docs");

        let err = engine
            .retrieve("anything at all", &RetrievalOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::VectorSearch(VectorStoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rerank_requires_reranker() {
        let (engine, _) = seeded_engine().await;
        let err = engine
            .search("bread", &RetrievalOptions::default().with_rerank(true))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::RerankerUnavailable));
    }

    #[tokio::test]
    async fn test_reranker_outage_surfaces_as_error() {
        let (engine, _) = seeded_engine().await;
        let engine = engine.with_reranker(Arc::new(DownReranker));
        let err = engine
            .retrieve("sourdough bread", &RetrievalOptions::default().with_rerank(true))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Rerank(RerankError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rerank_reorders_and_tags() {
        let (engine, _) = seeded_engine().await;
        let engine = engine.with_reranker(Arc::new(BrevityReranker));
        let options = RetrievalOptions::default().with_top_k(2).with_rerank(true);

        let results = engine.search("bread loaf sourdough", &options).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.len() <= results[1].content.len());

        let context = engine.retrieve("bread loaf sourdough", &options).await.unwrap();
        assert_eq!(context.strategy_tag, "hybrid+rerank");
    }

    #[tokio::test]
    async fn test_filter_restricts_documents() {
        let (engine, _) = seeded_engine().await;
        let options = RetrievalOptions::default().with_filter(SearchFilter::documents(["bread"]));
        let results = engine.search("ownership borrowing", &options).await.unwrap();
        assert!(results.iter().all(|r| r.document_id == "bread"));
    }
}
