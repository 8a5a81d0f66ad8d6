//! Redis cache implementation.
//!
//! Each logical key is stored as a Redis hash with two fields: `val` holds
//! the JSON payload and `ver` the version it was written at. Versions are
//! drawn from a single `INCR` sequence per key prefix, so a key that is
//! deleted and recreated never reuses an old version.

use crate::config::{CacheBackend, CacheConfig};
use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheStore, Versioned};
use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use std::future::Future;
use std::time::Duration;

const SCAN_BATCH: usize = 256;

/// KEYS[1] = data key, KEYS[2] = version sequence
/// ARGV[1] = value, ARGV[2] = ttl in ms (0 = persist)
const SET_SCRIPT: &str = r#"
local ver = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'val', ARGV[1], 'ver', ver)
if tonumber(ARGV[2]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  redis.call('PERSIST', KEYS[1])
end
return ver
"#;

/// KEYS[1] = data key, KEYS[2] = version sequence
/// ARGV[1] = expected version ('' = must be absent), ARGV[2] = value, ARGV[3] = ttl ms
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'ver')
if ARGV[1] == '' then
  if current then return 0 end
else
  if current ~= ARGV[1] then return 0 end
end
local ver = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'val', ARGV[2], 'ver', ver)
if tonumber(ARGV[3]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
else
  redis.call('PERSIST', KEYS[1])
end
return 1
"#;

/// Redis cache store.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    config: CacheConfig,
    set_script: Script,
    cas_script: Script,
}

impl RedisCache {
    /// Create a new Redis cache instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use warden_cache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = CacheConfig::redis("redis://localhost:6379")?;
    ///     let cache = RedisCache::new(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        if config.backend != CacheBackend::Redis {
            return Err(CacheError::Config(format!(
                "RedisCache requires a Redis configuration, got {}",
                config.backend
            )));
        }

        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(config.connection_timeout))?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        tracing::debug!(url = %config.url, "Connected Redis cache store");

        Ok(Self {
            connection,
            config,
            set_script: Script::new(SET_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn build_key(&self, key: &str) -> String {
        self.config.build_key(key)
    }

    fn version_key(&self) -> String {
        self.config.build_key("__warden_version_seq")
    }

    fn ttl_millis(&self, ttl: Option<Duration>) -> u64 {
        ttl.or(self.config.default_ttl)
            .map(|d| d.as_millis().max(1) as u64)
            .unwrap_or(0)
    }

    async fn bounded<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        Ok(self.bounded_raw(op).await??)
    }

    /// Like `bounded`, but hands the Redis result back for inspection.
    async fn bounded_raw<T, F>(&self, op: F) -> CacheResult<redis::RedisResult<T>>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let limit = self.config.operation_timeout;
        tokio::time::timeout(limit, op)
            .await
            .map_err(|_| CacheError::Timeout(limit))
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_versioned(&self, key: &str) -> CacheResult<Option<Versioned>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        let fields: redis::RedisResult<(Option<String>, Option<String>)> = self
            .bounded_raw(
                redis::cmd("HMGET")
                    .arg(&key)
                    .arg("val")
                    .arg("ver")
                    .query_async(&mut conn),
            )
            .await?;

        let (value, version) = match fields {
            Ok(fields) => fields,
            Err(e) if e.code() == Some("WRONGTYPE") => {
                return Err(CacheError::Deserialization(format!(
                    "key '{}' does not hold a versioned entry",
                    key
                )));
            }
            Err(e) => return Err(e.into()),
        };

        match (value, version) {
            (Some(value), Some(version)) => {
                let version = parse_version(&key, &version)?;
                Ok(Some(Versioned { value, version }))
            }
            _ => Ok(None),
        }
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let data_key = self.build_key(key);
        let version_key = self.version_key();
        let ttl_ms = self.ttl_millis(ttl);
        let mut conn = self.connection.clone();

        let mut invocation = self.set_script.key(&data_key);
        invocation.key(&version_key).arg(value).arg(ttl_ms);

        let _version: u64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let data_key = self.build_key(key);
        let version_key = self.version_key();
        let expected = expected.map(|v| v.to_string()).unwrap_or_default();
        let ttl_ms = self.ttl_millis(ttl);
        let mut conn = self.connection.clone();

        let mut invocation = self.cas_script.key(&data_key);
        invocation
            .key(&version_key)
            .arg(expected)
            .arg(value)
            .arg(ttl_ms);

        let swapped: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .bounded(redis::cmd("DEL").arg(&key).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let pattern = self.build_key(pattern);
        let version_key = self.version_key();
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            found.extend(
                batch
                    .into_iter()
                    .filter(|k| *k != version_key)
                    .map(|k| self.config.strip_key(&k).to_string()),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across iterations.
        found.sort();
        found.dedup();
        Ok(found)
    }
}

fn parse_version(key: &str, raw: &str) -> CacheResult<u64> {
    raw.parse().map_err(|_| {
        CacheError::Deserialization(format!("key '{}' has non-numeric version '{}'", key, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("k", "42").unwrap(), 42);
        assert!(matches!(
            parse_version("k", "forty-two"),
            Err(CacheError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_new_rejects_memory_config() {
        let err = RedisCache::new(CacheConfig::memory()).await.err().unwrap();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_build_key() {
        let config = CacheConfig::redis("redis://localhost:6379")
            .unwrap()
            .with_key_prefix("test");

        assert_eq!(config.build_key("key"), "test:key");
        assert_eq!(config.build_key("__warden_version_seq"), "test:__warden_version_seq");
    }

    // Requires a running Redis: cargo test --features redis -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_compare_and_swap() {
        let config = CacheConfig::redis("redis://localhost:6379")
            .unwrap()
            .with_key_prefix("warden-test");
        let cache = RedisCache::new(config).await.unwrap();
        cache.delete("cas").await.unwrap();

        assert!(cache.compare_and_swap("cas", None, "a".into(), None).await.unwrap());
        let current = cache.get_versioned("cas").await.unwrap().unwrap();
        assert_eq!(current.value, "a");

        assert!(!cache.compare_and_swap("cas", None, "b".into(), None).await.unwrap());
        assert!(
            cache
                .compare_and_swap("cas", Some(current.version), "b".into(), None)
                .await
                .unwrap()
        );

        assert!(cache.keys("ca*").await.unwrap().contains(&"cas".to_string()));
        assert!(cache.delete("cas").await.unwrap());
    }
}
