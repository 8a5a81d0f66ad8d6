//! Process-local cache store.

use crate::error::CacheResult;
use crate::pattern::wildcard_match;
use crate::traits::{CacheStore, Versioned};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// In-memory cache backed by a `HashMap` behind an async `RwLock`.
///
/// Expiry is lazy: an entry past its TTL reads as absent and is dropped on
/// the next write to that key or by [`InMemoryCache::purge_expired`].
/// Deadlines use tokio's clock so paused-time tests behave consistently.
#[derive(Clone)]
pub struct InMemoryCache {
    data: Arc<RwLock<HashMap<String, CacheEntry>>>,
    next_version: Arc<AtomicU64>,
    default_ttl: Option<Duration>,
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl InMemoryCache {
    /// Create new in-memory cache
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
            default_ttl: None,
        }
    }

    /// Apply `ttl` to writes that do not specify their own.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data.read().await.values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the cache holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry whose TTL has elapsed. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        before - data.len()
    }

    fn allocate_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn entry(&self, value: String, ttl: Option<Duration>) -> CacheEntry {
        CacheEntry {
            value,
            version: self.allocate_version(),
            expires_at: ttl.or(self.default_ttl).map(|d| Instant::now() + d),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_versioned(&self, key: &str) -> CacheResult<Option<Versioned>> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(data.get(key).filter(|e| e.is_live(now)).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        }))
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = self.entry(value, ttl);
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let current = data.get(key).filter(|e| e.is_live(now)).map(|e| e.version);

        if current != expected {
            return Ok(false);
        }

        let entry = self.entry(value, ttl);
        data.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self.data.write().await.remove(key);
        let now = Instant::now();
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(data
            .iter()
            .filter(|(k, e)| e.is_live(now) && wildcard_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
