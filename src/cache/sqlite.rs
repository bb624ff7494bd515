//! Persistent cache backend on SQLite
//!
//! Entries live in a single table keyed by cache key. Payloads above the
//! compression threshold are stored zstd-compressed. Every batch write runs
//! in one transaction.

use super::backend::{CacheBackend, CacheError};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Database connection pool
pub type CachePool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        payload BLOB NOT NULL,
        compressed INTEGER NOT NULL DEFAULT 0,
        expires_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
";

/// zstd level used for stored payloads
const COMPRESSION_LEVEL: i32 = 3;

pub struct SqliteCacheBackend {
    pool: CachePool,
    compression_threshold: usize,
}

impl SqliteCacheBackend {
    /// Open (or create) a cache database
    ///
    /// # Arguments
    /// * `db_path` - SQLite file location; parent directories are created
    /// * `compression_threshold` - Payloads of at least this many bytes are compressed
    pub fn open(db_path: &Path, compression_threshold: usize) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(8).build(manager)?;

        {
            let conn = pool.get()?;

            // WAL keeps readers off the writer's lock
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            conn.execute_batch(SCHEMA)?;
        }

        tracing::debug!("Opened SQLite cache at {}", db_path.display());

        Ok(Self {
            pool,
            compression_threshold,
        })
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![now_millis()],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Run a closure against a pooled connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CacheError::Backend(format!("Cache task failed: {}", e)))?
    }

    fn encode(&self, payload: Vec<u8>) -> Result<(Vec<u8>, bool), CacheError> {
        if payload.len() >= self.compression_threshold {
            Ok((zstd::encode_all(&payload[..], COMPRESSION_LEVEL)?, true))
        } else {
            Ok((payload, false))
        }
    }
}

fn decode(payload: Vec<u8>, compressed: bool) -> Result<Vec<u8>, CacheError> {
    if compressed {
        Ok(zstd::decode_all(&payload[..])?)
    } else {
        Ok(payload)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(Vec<u8>, bool)> = conn
                .query_row(
                    "SELECT payload, compressed FROM cache_entries
                     WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_millis()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(payload, compressed)| decode(payload, compressed))
                .transpose()
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.set_many(vec![(key.to_string(), value, ttl)]).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            // One read transaction gives the whole batch a consistent snapshot
            let tx = conn.transaction()?;
            let now = now_millis();
            let mut results = Vec::with_capacity(keys.len());
            {
                let mut stmt = tx.prepare(
                    "SELECT payload, compressed FROM cache_entries
                     WHERE key = ?1 AND expires_at > ?2",
                )?;
                for key in &keys {
                    let row: Option<(Vec<u8>, bool)> = stmt
                        .query_row(params![key, now], |row| Ok((row.get(0)?, row.get(1)?)))
                        .optional()?;
                    results.push(
                        row.map(|(payload, compressed)| decode(payload, compressed))
                            .transpose()?,
                    );
                }
            }
            tx.commit()?;
            Ok(results)
        })
        .await
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>, Duration)>) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::with_capacity(entries.len());
        for (key, payload, ttl) in entries {
            let (payload, compressed) = self.encode(payload)?;
            rows.push((key, payload, compressed, expiry_millis(ttl)));
        }

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO cache_entries (key, payload, compressed, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (key, payload, compressed, expires_at) in &rows {
                    stmt.execute(params![key, payload, compressed, expires_at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM cache_entries WHERE key = ?1")?;
                for key in &keys {
                    removed += stmt.execute(params![key])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let pattern = pattern.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM cache_entries WHERE key GLOB ?1 AND expires_at > ?2",
            )?;
            let keys = stmt
                .query_map(params![pattern, now_millis()], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
