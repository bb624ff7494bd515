//! Content-addressed cache for embeddings and query results
//!
//! Keys are BLAKE3 hashes of case-folded, whitespace-collapsed content plus
//! the model id and an optional scope, laid out as
//! `{namespace}:{class}:{scope}:{hash}`. Two TTL classes exist: long-lived
//! embeddings and short-lived query results.
//!
//! Document ids never appear verbatim in a key. Entries owned by one document
//! live under `{namespace}:docscope:{document_hash}:{class}:{hash}`, and query
//! results are tagged with every document they were built from
//! (`{namespace}:doc:{document_hash}:{hash}`), so a document change evicts
//! exactly its own entries.
//!
//! Every method treats backend failures as a miss or a no-op: callers never
//! see a cache error.

mod backend;
mod memory;
mod sqlite;

pub use backend::{CacheBackend, CacheError};
pub use memory::MemoryCacheBackend;
pub use sqlite::SqliteCacheBackend;

use backend::escape_glob;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache entry lifetime class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    Embedding,
    QueryResult,
}

impl TtlClass {
    fn segment(&self) -> &'static str {
        match self {
            TtlClass::Embedding => "emb",
            TtlClass::QueryResult => "query",
        }
    }
}

/// One entry of a batch write
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub ttl_class: TtlClass,
}

/// Cache layer settings
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Prefix shared by every key this cache writes
    pub namespace: String,
    pub embedding_ttl: Duration,
    pub query_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: "ragline".to_string(),
            embedding_ttl: Duration::from_secs(7 * 24 * 3600),
            query_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    invalidations: AtomicU64,
}

/// Cache facade shared by the batch processor and the retrieval engine
pub struct RagCache {
    backend: Arc<dyn CacheBackend>,
    settings: CacheSettings,
    counters: Counters,
}

impl RagCache {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self {
            backend,
            settings,
            counters: Counters::default(),
        }
    }

    /// Cache over a fresh in-memory backend with default settings
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), CacheSettings::default())
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Embedding => self.settings.embedding_ttl,
            TtlClass::QueryResult => self.settings.query_ttl,
        }
    }

    /// Build a stable key for `content` under `model_id` and an optional scope
    pub fn key(&self, class: TtlClass, content: &str, model_id: &str, scope: Option<&str>) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize(content).as_bytes());
        hasher.update(b"\0");
        hasher.update(model_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(scope.unwrap_or_default().as_bytes());

        format!(
            "{}:{}:{}:{}",
            self.settings.namespace,
            class.segment(),
            scope.unwrap_or("global"),
            hasher.finalize().to_hex()
        )
    }

    /// Key for an entry owned by one document, evicted with it
    pub fn document_key(&self, class: TtlClass, content: &str, model_id: &str, document_id: &str) -> String {
        let document = document_hash(document_id);
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize(content).as_bytes());
        hasher.update(b"\0");
        hasher.update(model_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(document.as_bytes());

        format!(
            "{}:docscope:{}:{}:{}",
            self.settings.namespace,
            document,
            class.segment(),
            hasher.finalize().to_hex()
        )
    }

    pub fn embedding_key(&self, text: &str, model_id: &str) -> String {
        self.key(TtlClass::Embedding, text, model_id, None)
    }

    pub fn query_key(&self, query: &str, model_id: &str, scope: Option<&str>) -> String {
        self.key(TtlClass::QueryResult, query, model_id, scope)
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.record_error("get", &e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        match self.backend.set(key, value, ttl).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.record_error("set", &e),
        }
    }

    /// Fetch many keys in one round trip; a failed batch reads as all misses
    pub async fn get_batch(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        if keys.is_empty() {
            return Vec::new();
        }

        let values = match self.backend.get_many(keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                warn!(
                    "Cache backend returned {} values for {} keys, treating batch as miss",
                    values.len(),
                    keys.len()
                );
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                vec![None; keys.len()]
            }
            Err(e) => {
                self.record_error("get_batch", &e);
                vec![None; keys.len()]
            }
        };

        let hits = values.iter().filter(|v| v.is_some()).count() as u64;
        self.counters.hits.fetch_add(hits, Ordering::Relaxed);
        self.counters
            .misses
            .fetch_add(keys.len() as u64 - hits, Ordering::Relaxed);

        values
    }

    /// Write a batch atomically, each entry with its class TTL
    pub async fn set_batch(&self, entries: Vec<CacheEntry>) {
        if entries.is_empty() {
            return;
        }

        let count = entries.len() as u64;
        let batch = entries
            .into_iter()
            .map(|e| {
                let ttl = self.ttl(e.ttl_class);
                (e.key, e.payload, ttl)
            })
            .collect();

        match self.backend.set_many(batch).await {
            Ok(()) => {
                self.counters.writes.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => self.record_error("set_batch", &e),
        }
    }

    /// Remove every entry that references `document_id`: query results tagged
    /// with it and entries scoped to it. Returns the number of removed keys.
    pub async fn invalidate_by_document(&self, document_id: &str) -> usize {
        let ns = escape_glob(&self.settings.namespace);
        let document = document_hash(document_id);
        let tag_pattern = format!("{}:doc:{}:*", ns, document);
        let scoped_pattern = format!("{}:docscope:{}:*", ns, document);

        let mut doomed: HashSet<String> = HashSet::new();

        let tags = match self.backend.scan(&tag_pattern).await {
            Ok(tags) => tags,
            Err(e) => {
                self.record_error("invalidate", &e);
                return 0;
            }
        };
        // Read tag targets straight from the backend so lookups stay out of the hit rate
        let targets = if tags.is_empty() {
            Vec::new()
        } else {
            match self.backend.get_many(&tags).await {
                Ok(targets) => targets,
                Err(e) => {
                    self.record_error("invalidate", &e);
                    vec![None; tags.len()]
                }
            }
        };
        for (tag, target) in tags.iter().zip(targets) {
            doomed.insert(tag.clone());
            if let Some(target) = target.and_then(|t| String::from_utf8(t).ok()) {
                doomed.insert(target);
            }
        }

        match self.backend.scan(&scoped_pattern).await {
            Ok(keys) => doomed.extend(keys),
            Err(e) => self.record_error("invalidate", &e),
        }

        if doomed.is_empty() {
            return 0;
        }

        let keys: Vec<String> = doomed.into_iter().collect();
        match self.backend.delete(&keys).await {
            Ok(removed) => {
                self.counters
                    .invalidations
                    .fetch_add(removed as u64, Ordering::Relaxed);
                debug!("Invalidated {} cache entries for document {}", removed, document_id);
                removed
            }
            Err(e) => {
                self.record_error("invalidate", &e);
                0
            }
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            hits,
            misses,
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Cached vectors for `texts`, aligned with the input
    pub async fn get_embeddings(&self, texts: &[String], model_id: &str) -> Vec<Option<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.embedding_key(t, model_id)).collect();
        self.get_batch(&keys)
            .await
            .into_iter()
            .map(|payload| payload.and_then(|p| self.decode::<Vec<f32>>(&p)))
            .collect()
    }

    /// Store generated vectors in one batch
    pub async fn set_embeddings(&self, items: &[(String, Vec<f32>)], model_id: &str) {
        let entries = items
            .iter()
            .filter_map(|(text, vector)| {
                let payload = serde_json::to_vec(vector).ok()?;
                Some(CacheEntry {
                    key: self.embedding_key(text, model_id),
                    payload,
                    ttl_class: TtlClass::Embedding,
                })
            })
            .collect();
        self.set_batch(entries).await;
    }

    /// Typed read of a cached query result
    pub async fn get_query_result<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key).await?;
        self.decode(&payload)
    }

    /// Store a query result together with one tag per contributing document
    pub async fn set_query_result<T: Serialize>(&self, key: &str, value: &T, document_ids: &[String]) {
        let payload = match serde_json::to_vec(value) {
            Ok(p) => p,
            Err(e) => {
                self.record_error("encode", &CacheError::Serialization(e));
                return;
            }
        };

        let key_hash = blake3::hash(key.as_bytes()).to_hex();
        let unique: HashSet<String> = document_ids.iter().map(String::as_str).map(document_hash).collect();

        let mut entries = vec![CacheEntry {
            key: key.to_string(),
            payload,
            ttl_class: TtlClass::QueryResult,
        }];
        entries.extend(unique.into_iter().map(|doc| CacheEntry {
            key: format!("{}:doc:{}:{}", self.settings.namespace, doc, key_hash),
            payload: key.as_bytes().to_vec(),
            ttl_class: TtlClass::QueryResult,
        }));

        self.set_batch(entries).await;
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Option<T> {
        match serde_json::from_slice(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error("decode", &CacheError::Serialization(e));
                None
            }
        }
    }

    fn record_error(&self, op: &str, error: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!("Cache {} failed, continuing without cache: {}", op, error);
    }
}

/// Fixed-width hex digest standing in for a document id inside keys
fn document_hash(document_id: &str) -> String {
    blake3::hash(document_id.as_bytes()).to_hex().to_string()
}

/// Case-fold and collapse whitespace so trivially different inputs share a key
pub fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Backend that fails every call
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
        async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
        async fn set_many(&self, _e: Vec<(String, Vec<u8>, Duration)>) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
        async fn delete(&self, _keys: &[String]) -> Result<usize, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
        async fn scan(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
    }

    #[test]
    fn test_keys_are_stable_and_normalized() {
        let cache = RagCache::in_memory();
        let a = cache.embedding_key("Hello   World", "model-a");
        let b = cache.embedding_key("hello world", "model-a");
        let c = cache.embedding_key("hello world", "model-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("ragline:emb:global:"));

        let scoped = cache.query_key("q", "m", Some("docs"));
        assert!(scoped.starts_with("ragline:query:docs:"));
        assert_ne!(scoped, cache.query_key("q", "m", None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_and_ttl_expiry() {
        let cache = RagCache::in_memory();
        cache.set("k", b"v".to_vec(), Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_backend_failures_degrade_to_miss() {
        let cache = RagCache::new(Arc::new(BrokenBackend), CacheSettings::default());
        cache.set("k", vec![1], Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.get_batch(&["a".to_string(), "b".to_string()]).await, vec![None, None]);
        assert_eq!(cache.invalidate_by_document("doc").await, 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert!(stats.errors >= 3);
    }

    #[tokio::test]
    async fn test_embeddings_batch_roundtrip() {
        let cache = RagCache::in_memory();
        let items = vec![("alpha".to_string(), vec![0.1, 0.2]), ("beta".to_string(), vec![0.3])];
        cache.set_embeddings(&items, "m").await;

        let got = cache
            .get_embeddings(&["ALPHA".to_string(), "gamma".to_string(), "beta".to_string()], "m")
            .await;
        assert_eq!(got, vec![Some(vec![0.1, 0.2]), None, Some(vec![0.3])]);
    }

    #[tokio::test]
    async fn test_invalidate_by_document() {
        let cache = RagCache::in_memory();
        let k1 = cache.query_key("what is rust", "m", None);
        let k2 = cache.query_key("what is cargo", "m", None);
        cache
            .set_query_result(&k1, &"answer one", &["doc-1".to_string(), "doc-2".to_string()])
            .await;
        cache.set_query_result(&k2, &"answer two", &["doc-2".to_string()]).await;

        let scoped = cache.document_key(TtlClass::QueryResult, "q", "m", "doc-1");
        cache.set(&scoped, vec![9], Duration::from_secs(60)).await;

        let removed = cache.invalidate_by_document("doc-1").await;
        // query result, its doc-1 tag and the doc-1 scoped entry
        assert_eq!(removed, 3);

        assert_eq!(cache.get_query_result::<String>(&k1).await, None);
        assert_eq!(cache.get(&scoped).await, None);
        assert_eq!(
            cache.get_query_result::<String>(&k2).await.as_deref(),
            Some("answer two")
        );
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[tokio::test]
    async fn test_invalidation_ignores_scope_names() {
        let cache = RagCache::in_memory();
        cache
            .set_embeddings(
                &[("alpha".to_string(), vec![1.0]), ("beta".to_string(), vec![2.0])],
                "m",
            )
            .await;
        let query = cache.query_key("what is rust", "m", Some("docs"));
        cache.set_query_result(&query, &"answer", &["guide".to_string()]).await;

        // "global" and the collection name are scope segments, not documents
        assert_eq!(cache.invalidate_by_document("global").await, 0);
        assert_eq!(cache.invalidate_by_document("docs").await, 0);
        assert_eq!(cache.invalidate_by_document("emb").await, 0);

        assert_eq!(
            cache.get_embeddings(&["alpha".to_string(), "beta".to_string()], "m").await,
            vec![Some(vec![1.0]), Some(vec![2.0])]
        );
        assert_eq!(
            cache.get_query_result::<String>(&query).await.as_deref(),
            Some("answer")
        );
    }

    #[tokio::test]
    async fn test_invalidation_does_not_match_id_prefixes() {
        let cache = RagCache::in_memory();
        let short = cache.query_key("q1", "m", None);
        let nested = cache.query_key("q2", "m", None);
        cache.set_query_result(&short, &"a", &["a".to_string()]).await;
        cache.set_query_result(&nested, &"a:x", &["a:x".to_string()]).await;
        let owned = cache.document_key(TtlClass::Embedding, "chunk", "m", "a:x");
        cache.set(&owned, vec![1], Duration::from_secs(60)).await;

        // result and its tag
        assert_eq!(cache.invalidate_by_document("a").await, 2);
        assert_eq!(cache.get_query_result::<String>(&short).await, None);
        assert_eq!(
            cache.get_query_result::<String>(&nested).await.as_deref(),
            Some("a:x")
        );
        assert!(cache.get(&owned).await.is_some());

        // result, tag and the owned entry
        assert_eq!(cache.invalidate_by_document("a:x").await, 3);
        assert_eq!(cache.get(&owned).await, None);
    }

    #[tokio::test]
    async fn test_invalidation_leaves_hit_rate_alone() {
        let cache = RagCache::in_memory();
        let key = cache.query_key("q", "m", None);
        cache.set_query_result(&key, &"v", &["doc".to_string()]).await;
        assert!(cache.get(&key).await.is_some());

        cache.invalidate_by_document("doc").await;
        cache.invalidate_by_document("missing").await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert!((stats.hit_rate - 1.0).abs() < f64::EPSILON);
    }
}
