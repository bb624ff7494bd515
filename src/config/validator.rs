use super::{parse_duration, SCHEMA_VERSION};
use crate::chunking::ChunkStrategy;
use crate::config::Config;
use crate::error::{RaglineError, Result, ValidationError};
use crate::index::Distance;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_batch(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_index(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RaglineError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        let valid_providers = ["hash", "fastembed"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Err(e) = config.chunking.strategy.parse::<ChunkStrategy>() {
            errors.push(ValidationError::new("chunking.strategy", e.to_string()));
        }

        if config.chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        let backend = &config.cache.backend;
        if backend != "memory" && backend != "sqlite" {
            errors.push(ValidationError::new(
                "cache.backend",
                format!("Backend must be 'memory' or 'sqlite', got '{}'", backend),
            ));
        }

        if backend == "sqlite" && config.cache.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "cache.path",
                "SQLite cache path cannot be empty",
            ));
        }

        if config.cache.namespace.is_empty() || config.cache.namespace.contains(':') {
            errors.push(ValidationError::new(
                "cache.namespace",
                "Namespace must be non-empty and must not contain ':'",
            ));
        }

        Self::check_duration("cache.embedding_ttl", &config.cache.embedding_ttl, errors);
        Self::check_duration("cache.query_ttl", &config.cache.query_ttl, errors);
    }

    fn validate_batch(config: &Config, errors: &mut Vec<ValidationError>) {
        let positive = [
            ("batch.batch_size", config.batch.batch_size),
            ("batch.max_concurrent", config.batch.max_concurrent),
            ("batch.requests_per_minute", config.batch.requests_per_minute),
            ("batch.tokens_per_minute", config.batch.tokens_per_minute),
            ("batch.max_attempts", config.batch.max_attempts as usize),
        ];
        for (path, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }

        Self::check_duration("batch.initial_backoff", &config.batch.initial_backoff, errors);
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        for (path, weight) in [
            ("retrieval.vector_weight", retrieval.vector_weight),
            ("retrieval.keyword_weight", retrieval.keyword_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        if retrieval.vector_weight == 0.0 && retrieval.keyword_weight == 0.0 {
            errors.push(ValidationError::new(
                "retrieval",
                "vector_weight and keyword_weight cannot both be 0",
            ));
        }

        if retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if retrieval.over_fetch == 0 {
            errors.push(ValidationError::new(
                "retrieval.over_fetch",
                "over_fetch must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.collection.is_empty() {
            errors.push(ValidationError::new(
                "index.collection",
                "Collection name cannot be empty",
            ));
        }

        if let Err(message) = config.index.distance.parse::<Distance>() {
            errors.push(ValidationError::new("index.distance", message));
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        if parse_duration(value).is_none() {
            errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            ));
        }
    }
}
