//! Configuration management for ragline
//!
//! Loaded from TOML, then overridden from `RAGLINE_SECTION__KEY` environment
//! variables, then validated as a whole. Durations are kept as strings in the
//! file (`500ms`, `30s`, `30m`, `24h`, `7d`) and converted by the typed
//! accessors.

use crate::cache::CacheSettings;
use crate::chunking::{ChunkStrategy, Chunker};
use crate::embedding::BatchConfig;
use crate::error::{RaglineError, Result};
use crate::index::Distance;
use crate::retrieval::RetrievalOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub cache: CacheConfig,
    pub batch: BatchSettings,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Embedding provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" (built in) or "fastembed" (needs the `local-models` feature)
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub strategy: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// "memory" or "sqlite"
    pub backend: String,
    pub path: PathBuf,
    pub namespace: String,
    pub embedding_ttl: String,
    pub query_ttl: String,
    /// Payloads of at least this many bytes are compressed (sqlite only)
    pub compression_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub requests_per_minute: usize,
    pub tokens_per_minute: usize,
    pub max_attempts: u32,
    pub initial_backoff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_tokens: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub over_fetch: usize,
    pub rerank: bool,
    pub reranker_model: String,
    pub excerpt_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub collection: String,
    pub distance: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RaglineError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RaglineError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load the file at `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RaglineError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RaglineError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RaglineError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(strategy) = overrides.chunk_strategy {
            self.chunking.strategy = strategy;
        }
        if let Some(size) = overrides.chunk_size {
            self.chunking.chunk_size = size;
        }
        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(backend) = overrides.cache_backend {
            self.cache.backend = backend;
        }
        if let Some(rerank) = overrides.rerank {
            self.retrieval.rerank = rerank;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RAGLINE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RAGLINE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "CHUNKING__STRATEGY" => self.chunking.strategy = value.to_string(),
            "CHUNKING__CHUNK_SIZE" => self.chunking.chunk_size = parse_env(path, value)?,
            "CHUNKING__CHUNK_OVERLAP" => self.chunking.chunk_overlap = parse_env(path, value)?,
            "CACHE__BACKEND" => self.cache.backend = value.to_string(),
            "CACHE__PATH" => self.cache.path = PathBuf::from(value),
            "CACHE__NAMESPACE" => self.cache.namespace = value.to_string(),
            "CACHE__EMBEDDING_TTL" => self.cache.embedding_ttl = value.to_string(),
            "CACHE__QUERY_TTL" => self.cache.query_ttl = value.to_string(),
            "BATCH__BATCH_SIZE" => self.batch.batch_size = parse_env(path, value)?,
            "BATCH__MAX_CONCURRENT" => self.batch.max_concurrent = parse_env(path, value)?,
            "BATCH__REQUESTS_PER_MINUTE" => {
                self.batch.requests_per_minute = parse_env(path, value)?
            }
            "BATCH__TOKENS_PER_MINUTE" => self.batch.tokens_per_minute = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "RETRIEVAL__MAX_TOKENS" => self.retrieval.max_tokens = parse_env(path, value)?,
            "RETRIEVAL__RERANK" => self.retrieval.rerank = parse_env(path, value)?,
            "INDEX__COLLECTION" => self.index.collection = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RaglineError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("ragline").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| RaglineError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".ragline"))
    }

    pub fn embedding_ttl(&self) -> Result<Duration> {
        duration_at("cache.embedding_ttl", &self.cache.embedding_ttl)
    }

    pub fn query_ttl(&self) -> Result<Duration> {
        duration_at("cache.query_ttl", &self.cache.query_ttl)
    }

    pub fn initial_backoff(&self) -> Result<Duration> {
        duration_at("batch.initial_backoff", &self.batch.initial_backoff)
    }

    pub fn chunk_strategy(&self) -> Result<ChunkStrategy> {
        Ok(self.chunking.strategy.parse::<ChunkStrategy>()?)
    }

    pub fn distance(&self) -> Result<Distance> {
        self.index
            .distance
            .parse()
            .map_err(|message| RaglineError::InvalidConfigValue {
                path: "index.distance".to_string(),
                message,
            })
    }

    pub fn chunker(&self) -> Result<Chunker> {
        Ok(Chunker::new(
            self.chunk_strategy()?,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        )?)
    }

    pub fn cache_settings(&self) -> Result<CacheSettings> {
        Ok(CacheSettings {
            namespace: self.cache.namespace.clone(),
            embedding_ttl: self.embedding_ttl()?,
            query_ttl: self.query_ttl()?,
        })
    }

    pub fn batch_config(&self) -> Result<BatchConfig> {
        Ok(BatchConfig {
            batch_size: self.batch.batch_size,
            max_concurrent: self.batch.max_concurrent,
            requests_per_minute: self.batch.requests_per_minute,
            tokens_per_minute: self.batch.tokens_per_minute,
            max_attempts: self.batch.max_attempts,
            initial_backoff: self.initial_backoff()?,
        })
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            top_k: self.retrieval.top_k,
            max_tokens: self.retrieval.max_tokens,
            vector_weight: self.retrieval.vector_weight,
            keyword_weight: self.retrieval.keyword_weight,
            rerank: self.retrieval.rerank,
            over_fetch: self.retrieval.over_fetch,
            excerpt_chars: self.retrieval.excerpt_chars,
            ..Default::default()
        }
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RaglineError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

fn duration_at(path: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| RaglineError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration: {}", value),
    })
}

/// Parse `500ms`, `30s`, `30m`, `24h`, `7d`; a bare number is seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let n: u64 = number.parse().ok()?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(n),
        "" | "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.checked_mul(60)?),
        "h" => Duration::from_secs(n.checked_mul(3600)?),
        "d" => Duration::from_secs(n.checked_mul(86_400)?),
        _ => return None,
    };
    Some(duration)
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".ragline"));

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
            },
            chunking: ChunkingConfig {
                strategy: "sentence".to_string(),
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            cache: CacheConfig {
                backend: "sqlite".to_string(),
                path: data_dir.join("cache.db"),
                namespace: "ragline".to_string(),
                embedding_ttl: "7d".to_string(),
                query_ttl: "30m".to_string(),
                compression_threshold: 1024,
            },
            batch: BatchSettings {
                batch_size: 100,
                max_concurrent: 4,
                requests_per_minute: 3000,
                tokens_per_minute: 1_000_000,
                max_attempts: 3,
                initial_backoff: "500ms".to_string(),
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                max_tokens: 4000,
                vector_weight: 0.7,
                keyword_weight: 0.3,
                over_fetch: 4,
                rerank: false,
                reranker_model: "bge-reranker-base".to_string(),
                excerpt_chars: 200,
            },
            index: IndexConfig {
                collection: "documents".to_string(),
                distance: "cosine".to_string(),
            },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5w"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_typed_accessors() {
        let config = Config::default();
        assert_eq!(config.embedding_ttl().unwrap(), Duration::from_secs(604_800));
        assert_eq!(config.query_ttl().unwrap(), Duration::from_secs(1800));
        assert_eq!(config.initial_backoff().unwrap(), Duration::from_millis(500));
        assert_eq!(config.chunk_strategy().unwrap(), ChunkStrategy::Sentence);
        assert_eq!(config.distance().unwrap(), Distance::Cosine);
        assert_eq!(config.batch_config().unwrap().batch_size, 100);
        assert_eq!(config.retrieval_options().top_k, 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.chunking.strategy = "paragraph".to_string();
        config.profiles.insert(
            "precise".to_string(),
            ProfileOverrides {
                rerank: Some(true),
                chunk_size: Some(400),
                ..Default::default()
            },
        );
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.chunking.strategy, "paragraph");

        let profiled = Config::load_with_profile(&path, "precise").unwrap();
        assert!(profiled.retrieval.rerank);
        assert_eq!(profiled.chunking.chunk_size, 400);

        assert!(Config::load_with_profile(&path, "missing").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/ragline.toml")).unwrap_err();
        assert!(matches!(err, RaglineError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config.set_value_from_env("CHUNKING__CHUNK_SIZE", "250").unwrap();
        config.set_value_from_env("RETRIEVAL__RERANK", "true").unwrap();
        config.set_value_from_env("CACHE__QUERY_TTL", "5m").unwrap();
        config.set_value_from_env("SOMETHING__ELSE", "ignored").unwrap();

        assert_eq!(config.chunking.chunk_size, 250);
        assert!(config.retrieval.rerank);
        assert_eq!(config.query_ttl().unwrap(), Duration::from_secs(300));

        let err = config.set_value_from_env("BATCH__BATCH_SIZE", "many").unwrap_err();
        assert!(matches!(err, RaglineError::InvalidConfigValue { .. }));
    }
}
