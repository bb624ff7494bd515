//! Key-value backend abstraction for the cache layer

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// External key-value store with per-entry TTL
///
/// Implementations must be safe for concurrent use, and `set_many` must make a
/// batch visible all at once or not at all.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch one live entry
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store one entry that expires after `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Fetch many entries in one round trip, aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError>;

    /// Store many entries atomically
    async fn set_many(&self, entries: Vec<(String, Vec<u8>, Duration)>) -> Result<(), CacheError>;

    /// Remove entries, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Keys of live entries matching a glob pattern (`*` any run, `?` any char)
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

/// Glob match supporting `*` and `?`, the subset shared by every backend.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some(&ch) if ch == '?' || ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star_p, star_c)) => {
                    p = star_p + 1;
                    c = star_c + 1;
                    backtrack = Some((star_p, star_c + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

/// Replaces glob metacharacters in a literal with single-char wildcards.
pub(crate) fn escape_glob(literal: &str) -> String {
    literal
        .chars()
        .map(|c| if matches!(c, '*' | '?' | '[' | ']') { '?' } else { c })
        .collect()
}
