//! Ragline - chunking, hybrid retrieval and caching for RAG pipelines
//!
//! Documents are split into annotated chunks, embedded through a cache-aware,
//! rate-limited batch processor and written to an external vector store. At
//! query time the retrieval engine fuses vector and keyword scores, optionally
//! reranks, and assembles a token-bounded context with citations.

pub mod cache;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod retrieval;

pub use error::{RaglineError, Result};
