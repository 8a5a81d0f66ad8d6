//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// A cached value together with the version it was written at.
///
/// Versions are opaque: callers only compare them for equality and hand
/// them back to [`CacheStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// The stored JSON string
    pub value: String,
    /// Version assigned by the store on the last successful write
    pub version: u64,
}

/// Cache store trait for different cache backends.
///
/// Besides plain get/set/delete, every store supports a conditional write
/// keyed by version so that a read-modify-write over a shared value can be
/// made safe without a distributed lock.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value together with its current version.
    ///
    /// Returns `Ok(None)` if the key does not exist or its TTL has elapsed.
    async fn get_versioned(&self, key: &str) -> CacheResult<Option<Versioned>>;

    /// Set a JSON value in the cache unconditionally.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The JSON string value
    /// * `ttl` - Optional time-to-live duration
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Write `value` only if the key is still at `expected`.
    ///
    /// `expected = None` means the key must not exist. Returns `Ok(true)` when
    /// the write happened and `Ok(false)` when another writer got there first.
    /// A successful write always yields a version this store has never handed
    /// out before, even if the key was deleted and recreated in between.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Delete a key from the cache.
    ///
    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// List keys matching a wildcard pattern (`*` and `?`).
    ///
    /// Keys are returned without any backend-level prefix.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Get a JSON value from the cache.
    ///
    /// Returns `Ok(Some(value))` if the key exists, `Ok(None)` if not found,
    /// or an error if the operation fails.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.get_versioned(key).await?.map(|v| v.value))
    }

    /// Check if a key exists in the cache.
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get_versioned(key).await?.is_some())
    }

    // ========== Batch Operations (Parallel) ==========

    /// Get multiple keys in parallel.
    ///
    /// Returns a vector of `Option<String>` in the same order as the input keys.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.get_json(key));
        try_join_all(futures).await
    }

    /// Delete multiple keys in parallel.
    ///
    /// Returns how many of them held a live entry.
    async fn delete_many(&self, keys: &[&str]) -> CacheResult<usize> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.delete(key));
        let removed = try_join_all(futures).await?;
        Ok(removed.into_iter().filter(|r| *r).count())
    }
}
