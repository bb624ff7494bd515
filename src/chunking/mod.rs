//! Document chunking
//!
//! Splits raw document text into ordered, annotated spans ready for embedding.
//! Four strategies are available:
//! - `Sentence`: greedy sentence packing with backward sentence overlap
//! - `Paragraph`: blank-line blocks, oversized blocks split by sentence
//! - `Fixed`: character windows snapped to nearby sentence ends
//! - `Semantic`: consecutive sentences grouped while they stay on topic
//!
//! Offsets (`start_pos`, `end_pos`) and `char_count` are measured in chars.

mod fixed;
mod paragraph;
mod semantic;
mod sentence;
mod text;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use text::{split_sentences, CharIndex, Span};

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Unknown chunking strategy: '{0}' (expected sentence, paragraph, fixed or semantic)")]
    UnknownStrategy(String),

    #[error("Chunk size must be greater than 0")]
    ZeroChunkSize,
}

/// Chunking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Sentence,
    Paragraph,
    Fixed,
    Semantic,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::Paragraph => "paragraph",
            ChunkStrategy::Fixed => "fixed",
            ChunkStrategy::Semantic => "semantic",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sentence" => Ok(ChunkStrategy::Sentence),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            "fixed" => Ok(ChunkStrategy::Fixed),
            "semantic" => Ok(ChunkStrategy::Semantic),
            _ => Err(ChunkError::UnknownStrategy(s.to_string())),
        }
    }
}

/// A bounded span of a document with derived statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    /// Position within the document, contiguous from 0
    pub chunk_index: usize,
    pub start_pos: usize,
    pub end_pos: usize,
    pub char_count: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub strategy: ChunkStrategy,
    /// Id of the vector written to the index, once it exists
    pub embedding_id: Option<String>,
    pub has_embedding: bool,
}

impl Chunk {
    /// Records that this chunk's vector has landed in the index.
    pub fn mark_embedded(&mut self, embedding_id: impl Into<String>) {
        self.embedding_id = Some(embedding_id.into());
        self.has_embedding = true;
    }
}

/// Chunker configured with one strategy and size budget
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Create a chunker
    ///
    /// # Arguments
    /// * `strategy` - Splitting strategy
    /// * `chunk_size` - Target maximum chunk length in chars
    /// * `chunk_overlap` - Maximum shared text between neighbouring chunks
    ///   (Sentence and Fixed strategies only)
    pub fn new(
        strategy: ChunkStrategy,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }

        Ok(Self {
            strategy,
            chunk_size,
            chunk_overlap,
        })
    }

    /// Create a chunker from a strategy tag such as `"sentence"`
    pub fn from_tag(tag: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        Self::new(tag.parse()?, chunk_size, chunk_overlap)
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Split a document into ordered chunks.
    ///
    /// Empty or whitespace-only content yields no chunks.
    pub fn chunk(&self, document_id: &str, content: &str) -> Vec<Chunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let index = CharIndex::new(content);
        let whole = Span::new(0, content.len());

        let spans = match self.strategy {
            ChunkStrategy::Sentence => sentence::chunk_sentences(
                &index,
                &split_sentences(content, whole),
                self.chunk_size,
                self.chunk_overlap,
            ),
            ChunkStrategy::Paragraph => {
                paragraph::chunk_paragraphs(content, &index, self.chunk_size)
            }
            ChunkStrategy::Fixed => {
                fixed::chunk_fixed(content, &index, self.chunk_size, self.chunk_overlap)
            }
            ChunkStrategy::Semantic => semantic::chunk_semantic(
                content,
                &index,
                &split_sentences(content, whole),
                self.chunk_size,
            ),
        };

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| {
                self.build_chunk(document_id, content, &index, chunk_index, span)
            })
            .collect();

        debug!(
            "Chunked document {} into {} chunks ({} strategy)",
            document_id,
            chunks.len(),
            self.strategy
        );

        chunks
    }

    fn build_chunk(
        &self,
        document_id: &str,
        content: &str,
        index: &CharIndex,
        chunk_index: usize,
        span: Span,
    ) -> Chunk {
        let body = span.slice(content);
        let start_pos = index.char_at(span.start);
        let end_pos = index.char_at(span.end);

        Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            content: body.to_string(),
            chunk_index,
            start_pos,
            end_pos,
            char_count: end_pos - start_pos,
            word_count: body.split_whitespace().count(),
            sentence_count: text::sentence_count(body),
            strategy: self.strategy,
            embedding_id: None,
            has_embedding: false,
        }
    }
}

/// Split `content` into chunks using the strategy named by `strategy`.
///
/// Fails on an unknown strategy tag or a zero `chunk_size`.
pub fn chunk(
    document_id: &str,
    content: &str,
    strategy: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, ChunkError> {
    Ok(Chunker::from_tag(strategy, chunk_size, chunk_overlap)?.chunk(document_id, content))
}
