//! Embedding generation
//!
//! - `EmbeddingProvider` trait for the external model boundary
//! - `HashEmbedder` for offline use, `FastEmbedProvider` behind `local-models`
//! - `BatchEmbeddingProcessor`: cache check, sub-batching, bounded
//!   parallelism, rate limiting and retries
mod batch;
mod progress;
mod provider;
mod rate_limit;

pub use batch::{BatchConfig, BatchEmbeddingProcessor, BatchMetadata, BatchOutput, EmbeddingResult};
pub use progress::{BatchProgress, ProgressSnapshot};
#[cfg(feature = "local-models")]
pub use provider::FastEmbedProvider;
pub use provider::{estimate_tokens, EmbeddingProvider, HashEmbedder, ProviderError};
pub use rate_limit::{RateLimiter, Reservation};
