//! Session-scoped token storage.
//!
//! All tokens of a session live in one cache entry. Every mutation runs as
//! an optimistic read-modify-write: read the entry with its version, compute
//! the new map, then write it back with [`CacheStore::compare_and_swap`].
//! A conflicting write sends the loop back to the read.

use crate::codec::{self, Decoded};
use crate::config::{CsrfConfig, DEFAULT_TOKEN_KEY};
use crate::error::{CsrfError, Result};
use crate::factory::TokenFactory;
use crate::providers::{Clock, OsRandom, RandomSource, SystemClock};
use crate::session::{RequestContext, SessionContext};
use crate::token::{TokenMap, TokenRecord};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use warden_cache::{CacheRegistry, CacheStore};

const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;
const CAS_RETRY_MAX_BACKOFF_MS: u64 = 50;

/// Outcome of one pass over a session's token map.
enum Edit<T> {
    /// Leave the stored entry as it is.
    Keep(T),
    /// Persist the edited map.
    Write(T),
}

/// Result of compacting one session's token map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Records dropped because they expired or failed to decode
    pub removed: usize,
    /// Whether the entry was rewritten
    pub rewritten: bool,
}

/// Issues, verifies and rotates session-bound CSRF tokens.
#[derive(Clone)]
pub struct TokenStore {
    cache: Arc<dyn CacheStore>,
    config: Arc<CsrfConfig>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    factory: Arc<TokenFactory>,
}

impl TokenStore {
    /// Create a store over `cache` using the system clock and OS randomness.
    pub fn new(cache: Arc<dyn CacheStore>, config: Arc<CsrfConfig>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let random: Arc<dyn RandomSource> = Arc::new(OsRandom);
        Self {
            factory: Arc::new(TokenFactory::with_random(clock.clone(), random.clone())),
            cache,
            config,
            clock,
            random,
        }
    }

    /// Create a store over the cache partition named by `cache_storage`.
    pub fn from_registry(config: Arc<CsrfConfig>, registry: &CacheRegistry) -> Result<Self> {
        let cache = registry.get(&config.cache_storage)?;
        Ok(Self::new(cache, config))
    }

    /// Use `clock` for issuance and expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.rebuild_factory();
        self
    }

    /// Use `random` as the token entropy source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self.rebuild_factory();
        self
    }

    fn rebuild_factory(&mut self) {
        self.factory = Arc::new(TokenFactory::with_random(
            self.clock.clone(),
            self.random.clone(),
        ));
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Cache key holding the token map of `session`.
    pub fn storage_key(&self, session: &SessionContext) -> String {
        format!("{}{}", self.config.key_prefix, session.cache_key)
    }

    /// Return the active token for `key`, minting one if needed.
    ///
    /// With `force_new` a fresh token always replaces the current one.
    /// Other logical keys of the session are never touched except that
    /// expired records are pruned on write.
    pub async fn generate(
        &self,
        ctx: &RequestContext,
        key: Option<&str>,
        force_new: bool,
    ) -> Result<String> {
        let session = ctx.session().ok_or(CsrfError::NoSessionContext)?;
        let storage_key = self.storage_key(session);
        let key = normalize_key(key);
        let lifetime = self.config.rotation_ttl();
        let skew = self.config.timeout_skew();

        self.update(&storage_key, |decoded, now| {
            if !force_new {
                if let Some(record) = decoded.map.reusable(key, now, skew) {
                    tracing::debug!(storage_key = %storage_key, key, "Reusing active CSRF token");
                    return Edit::Keep(record.token.clone());
                }
            }

            let token = self.factory.new_token(key, ctx.ip(), &session.id);
            decoded.map.retain_active(now);
            decoded
                .map
                .insert(key, TokenRecord::new(token.clone(), now, lifetime));

            tracing::debug!(storage_key = %storage_key, key, force_new, "Issued CSRF token");
            Edit::Write(token)
        })
        .await
    }

    /// Check `token` against the active record for `key`.
    ///
    /// Never writes. A missing session map, missing key, expired record or
    /// mismatched token all yield `Ok(false)`.
    pub async fn verify(&self, ctx: &RequestContext, token: &str, key: Option<&str>) -> Result<bool> {
        let session = ctx.session().ok_or(CsrfError::NoSessionContext)?;
        let storage_key = self.storage_key(session);
        let key = normalize_key(key);

        let Some(raw) = self.cache.get_json(&storage_key).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        let decoded = codec::decode_map(&storage_key, &raw);
        let valid = decoded.map.get(key).is_some_and(|record| {
            constant_time_eq::constant_time_eq(record.token.as_bytes(), token.as_bytes())
                && record.is_active(now)
        });

        if !valid {
            tracing::debug!(storage_key = %storage_key, key, "CSRF token did not verify");
        }
        Ok(valid)
    }

    /// Invalidate every token of the session.
    ///
    /// Returns whether a token map existed.
    pub async fn rotate(&self, ctx: &RequestContext) -> Result<bool> {
        let session = ctx.session().ok_or(CsrfError::NoSessionContext)?;
        let storage_key = self.storage_key(session);

        let removed = self.cache.delete(&storage_key).await?;
        tracing::debug!(storage_key = %storage_key, removed, "Rotated CSRF tokens");
        Ok(removed)
    }

    /// Drop expired and undecodable records from the map under `storage_key`.
    ///
    /// An absent entry is left absent. A map that empties is written back as
    /// an empty map rather than deleted.
    pub async fn compact(&self, storage_key: &str) -> Result<Compaction> {
        self.update(storage_key, |decoded, now| {
            let removed = decoded.map.retain_active(now) + decoded.dropped;
            if removed == 0 {
                Edit::Keep(Compaction::default())
            } else {
                Edit::Write(Compaction {
                    removed,
                    rewritten: true,
                })
            }
        })
        .await
    }

    /// Run `edit` against the current map until its result is stored.
    ///
    /// `edit` is re-run from a fresh read after every conflict, so it must
    /// not carry state between calls.
    async fn update<T, F>(&self, storage_key: &str, mut edit: F) -> Result<T>
    where
        F: FnMut(&mut Decoded, DateTime<Utc>) -> Edit<T>,
    {
        let max_attempts = self.config.max_write_retries;
        let mut backoff_ms = CAS_RETRY_INITIAL_BACKOFF_MS;

        for attempt in 1..=max_attempts {
            let current = self.cache.get_versioned(storage_key).await?;
            let (mut decoded, version) = match current {
                Some(entry) => (codec::decode_map(storage_key, &entry.value), Some(entry.version)),
                None => (Decoded::default(), None),
            };

            let now = self.clock.now();
            let result = match edit(&mut decoded, now) {
                Edit::Keep(result) => return Ok(result),
                Edit::Write(result) => result,
            };

            let payload = codec::encode_map(&decoded.map)?;
            let ttl = self.entry_ttl(&decoded.map, now);
            if self
                .cache
                .compare_and_swap(storage_key, version, payload, ttl)
                .await?
            {
                return Ok(result);
            }

            tracing::debug!(storage_key, attempt, "Token map changed underneath; retrying");
            if attempt < max_attempts {
                let jitter = rand::thread_rng().gen_range(0..=backoff_ms);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                backoff_ms = (backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
            }
        }

        tracing::warn!(storage_key, attempts = max_attempts, "Giving up on contended token map");
        Err(CsrfError::Contention {
            key: storage_key.to_string(),
            attempts: max_attempts,
        })
    }

    /// Backend TTL for a map, when `entry_ttl` is on.
    ///
    /// A map with no live record keeps one rotation interval of lifetime so
    /// an emptied entry still leaves the backend on its own.
    fn entry_ttl(&self, map: &TokenMap, now: DateTime<Utc>) -> Option<Duration> {
        if !self.config.entry_ttl {
            return None;
        }
        map.latest_expiry()
            .and_then(|expires| (expires - now).to_std().ok())
            .filter(|ttl| !ttl.is_zero())
            .or_else(|| self.config.rotation_ttl().to_std().ok())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolve the logical key a caller asked for.
///
/// Missing, empty and whitespace-only keys all mean the default key.
pub fn normalize_key(key: Option<&str>) -> &str {
    match key.map(str::trim) {
        Some(k) if !k.is_empty() => k,
        _ => DEFAULT_TOKEN_KEY,
    }
}
