//! Document indexing: chunk → embed → upsert → invalidate

use crate::cache::RagCache;
use crate::chunking::{Chunk, ChunkError, Chunker};
use crate::embedding::{BatchEmbeddingProcessor, BatchMetadata, BatchProgress, EmbeddingResult};
use crate::index::{Point, VectorStore, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Document id cannot be empty")]
    EmptyDocumentId,

    #[error(transparent)]
    Chunking(#[from] ChunkError),

    #[error("Vector store write failed: {0}")]
    Store(#[from] VectorStoreError),
}

/// How a document is chunked
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub chunker: Chunker,
    /// Extra fields attached to every indexed point
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IndexOptions {
    pub fn new(chunker: Chunker) -> Self {
        Self {
            chunker,
            extra: serde_json::Map::new(),
        }
    }
}

/// Counts for one indexed document
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexingReport {
    pub chunks: usize,
    /// Chunks whose vector reached the index
    pub embedded: usize,
    /// Of those, served from the embedding cache
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub report: IndexingReport,
    /// Every chunk produced; check `has_embedding` before relying on one
    pub chunks: Vec<Chunk>,
}

/// Write path into one collection
pub struct DocumentIndexer {
    embedder: Arc<BatchEmbeddingProcessor>,
    store: Arc<dyn VectorStore>,
    cache: Arc<RagCache>,
    collection: String,
}

impl DocumentIndexer {
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
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Chunk, embed and index a document, then evict cached query results
    /// that referenced it
    ///
    /// Chunks whose embedding failed are returned with `has_embedding` unset
    /// and are not written to the index.
    pub async fn index_document(
        &self,
        document_id: &str,
        title: Option<&str>,
        text: &str,
        options: &IndexOptions,
    ) -> Result<IndexedDocument, IndexingError> {
        self.index_document_with_progress(document_id, title, text, options, None)
            .await
    }

    /// [`index_document`](Self::index_document) reporting embedding progress
    /// into `progress`
    pub async fn index_document_with_progress(
        &self,
        document_id: &str,
        title: Option<&str>,
        text: &str,
        options: &IndexOptions,
        progress: Option<Arc<BatchProgress>>,
    ) -> Result<IndexedDocument, IndexingError> {
        if document_id.trim().is_empty() {
            return Err(IndexingError::EmptyDocumentId);
        }

        let mut chunks = options.chunker.chunk(document_id, text);
        let mut report = IndexingReport {
            chunks: chunks.len(),
            ..Default::default()
        };

        if chunks.is_empty() {
            warn!("Document {} produced no chunks", document_id);
            self.cache.invalidate_by_document(document_id).await;
            return Ok(IndexedDocument { report, chunks });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let metadata = BatchMetadata {
            label: title.map(str::to_string),
            document_id: Some(document_id.to_string()),
        };
        let progress = progress.unwrap_or_else(|| Arc::new(BatchProgress::new(texts.len())));
        let output = self
            .embedder
            .process_with_progress(&texts, Some(&metadata), progress)
            .await;

        let mut points = Vec::new();
        let mut placed = Vec::new();
        for (idx, result) in output.embeddings.into_iter().enumerate() {
            match result {
                EmbeddingResult::Cached(vector) => {
                    report.cached += 1;
                    points.push(self.point(&chunks[idx], vector, title, options));
                    placed.push(idx);
                }
                EmbeddingResult::Generated(vector) => {
                    points.push(self.point(&chunks[idx], vector, title, options));
                    placed.push(idx);
                }
                EmbeddingResult::Skipped => report.skipped += 1,
                EmbeddingResult::Failed { error } => {
                    warn!(
                        "Chunk {} of {} not embedded: {}",
                        chunks[idx].chunk_index, document_id, error
                    );
                    report.failed += 1;
                }
            }
        }

        if !points.is_empty() {
            self.store.upsert(&self.collection, points).await?;
        }
        for idx in placed {
            let chunk = &mut chunks[idx];
            let id = chunk.id.clone();
            chunk.mark_embedded(id);
            report.embedded += 1;
        }

        let evicted = self.cache.invalidate_by_document(document_id).await;
        info!(
            "Indexed {}: {} chunks, {} embedded ({} cached), {} failed; {} cache entries evicted",
            document_id, report.chunks, report.embedded, report.cached, report.failed, evicted
        );

        Ok(IndexedDocument { report, chunks })
    }

    /// Delete a document's points and every cache entry referencing it
    pub async fn remove_document(
        &self,
        document_id: &str,
        chunk_ids: &[String],
    ) -> Result<usize, IndexingError> {
        let removed = if chunk_ids.is_empty() {
            0
        } else {
            self.store.delete(&self.collection, chunk_ids).await?
        };
        let evicted = self.cache.invalidate_by_document(document_id).await;
        info!(
            "Removed {} points for {}; {} cache entries evicted",
            removed, document_id, evicted
        );
        Ok(removed)
    }

    fn point(&self, chunk: &Chunk, vector: Vec<f32>, title: Option<&str>, options: &IndexOptions) -> Point {
        let mut point = Point::from_chunk(chunk, vector, title);
        point.payload.metadata.extra = options.extra.clone();
        point
    }
}
