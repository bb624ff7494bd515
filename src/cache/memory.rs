//! Process-local cache backend

use super::backend::{glob_match, CacheBackend, CacheError};
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory backend with lazy expiry
///
/// Expiry follows the tokio clock, so tests can advance time with
/// `tokio::time::advance`. A batch write holds the write lock for the whole
/// batch, so readers never see part of it.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<AHashMap<String, StoredValue>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, v| v.is_live(now));
        Ok(before - entries.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, AHashMap<String, StoredValue>>, CacheError> {
        self.entries
            .read()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, AHashMap<String, StoredValue>>, CacheError> {
        self.entries
            .write()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let entries = self.read()?;
        Ok(entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.payload.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.write()?.insert(
            key.to_string(),
            StoredValue {
                payload: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let now = Instant::now();
        let entries = self.read()?;
        Ok(keys
            .iter()
            .map(|k| {
                entries
                    .get(k)
                    .filter(|v| v.is_live(now))
                    .map(|v| v.payload.clone())
            })
            .collect())
    }

    async fn set_many(&self, batch: Vec<(String, Vec<u8>, Duration)>) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.write()?;
        for (key, payload, ttl) in batch {
            entries.insert(
                key,
                StoredValue {
                    payload,
                    expires_at: now + ttl,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut entries = self.write()?;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let entries = self.read()?;
        Ok(entries
            .iter()
            .filter(|(k, v)| v.is_live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let backend = MemoryCacheBackend::new();
        backend
            .set("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let backend = MemoryCacheBackend::new();
        backend
            .set("k", b"v".to_vec(), Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(backend.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert!(backend.scan("*").await.unwrap().is_empty());
        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_batch_and_scan() {
        let backend = MemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        backend
            .set_many(vec![
                ("ns:doc:a:1".to_string(), vec![1], ttl),
                ("ns:doc:a:2".to_string(), vec![2], ttl),
                ("ns:doc:b:1".to_string(), vec![3], ttl),
            ])
            .await
            .unwrap();

        let got = backend
            .get_many(&["ns:doc:a:2".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(got, vec![Some(vec![2]), None]);

        let mut keys = backend.scan("ns:doc:a:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ns:doc:a:1", "ns:doc:a:2"]);

        assert_eq!(backend.delete(&keys).await.unwrap(), 2);
        assert_eq!(backend.len(), 1);
    }
}
