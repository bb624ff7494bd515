//! Vector index boundary
//!
//! Approximate nearest-neighbour search lives in an external store reached
//! through [`VectorStore`]. This module defines that boundary, the typed point
//! payloads, an exact-scan in-memory store and the collection lifecycle
//! wrapper.

mod collection;
mod memory;

pub use collection::{CollectionError, CollectionManager};
pub use memory::InMemoryVectorStore;

use crate::chunking::{Chunk, ChunkStrategy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store error: {0}")]
    Backend(String),
}

/// Similarity metric, fixed per collection at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Cosine,
    Dot,
    Euclidean,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "cosine",
            Distance::Dot => "dot",
            Distance::Euclidean => "euclidean",
        }
    }

    /// Similarity of two equal-length vectors; higher is closer
    ///
    /// Cosine against a zero vector scores 0. Euclidean distance `d` maps to
    /// `1 / (1 + d)`.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
            Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Distance::Euclidean => {
                let d = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + d)
            }
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            "euclidean" | "euclid" => Ok(Distance::Euclidean),
            other => Err(format!(
                "Unknown distance metric '{}' (expected cosine, dot or euclidean)",
                other
            )),
        }
    }
}

/// Chunk details carried alongside each indexed vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    #[serde(default)]
    pub start_pos: usize,
    #[serde(default)]
    pub end_pos: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ChunkStrategy>,
    /// Open map for caller-defined fields
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub document_id: String,
    pub content: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Vector plus payload, keyed by chunk id
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl Point {
    /// Build the index point for an embedded chunk
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>, document_title: Option<&str>) -> Self {
        Self {
            id: chunk.id.clone(),
            vector,
            payload: PointPayload {
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                chunk_index: chunk.chunk_index,
                metadata: ChunkMetadata {
                    document_title: document_title.map(str::to_string),
                    start_pos: chunk.start_pos,
                    end_pos: chunk.end_pos,
                    strategy: Some(chunk.strategy),
                    extra: serde_json::Map::new(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// Restricts a search to a subset of points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only points from these documents; empty means no restriction
    #[serde(default)]
    pub document_ids: Vec<String>,
}

impl SearchFilter {
    pub fn documents<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, payload: &PointPayload) -> bool {
        self.document_ids.is_empty() || self.document_ids.iter().any(|d| *d == payload.document_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Ready,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub status: CollectionStatus,
    pub count: usize,
    pub dimension: usize,
    pub distance: Distance,
}

/// External vector index
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), VectorStoreError>;

    /// Drop a collection; returns whether it existed
    async fn delete_collection(&self, name: &str) -> Result<bool, VectorStoreError>;

    /// `None` when the collection does not exist
    async fn describe(&self, name: &str) -> Result<Option<CollectionInfo>, VectorStoreError>;

    /// Insert or replace points by id
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<(), VectorStoreError>;

    /// Top `limit` points by descending score
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    /// Remove points by id; returns how many existed
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, VectorStoreError>;
}
