//! Background compaction of expired tokens.

use crate::error::{CsrfError, Result};
use crate::store::TokenStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use warden_cache::pattern::prefix_pattern;

/// Summary of one reap cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Token maps found under the key prefix
    pub scanned: usize,
    /// Token maps rewritten
    pub compacted: usize,
    /// Records dropped across all maps
    pub removed: usize,
    /// Token maps that could not be compacted this cycle
    pub failed: usize,
}

/// Periodically drops expired records from every session's token map.
///
/// Compaction goes through the same conditional-write loop as
/// [`TokenStore::generate`], so a token issued while a sweep is running is
/// never lost.
#[derive(Debug, Clone)]
pub struct TokenReaper {
    store: TokenStore,
}

impl TokenReaper {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    /// Run one sweep over all token maps.
    ///
    /// Only enumeration failures fail the cycle. A session whose map cannot
    /// be compacted is logged and counted in [`ReapReport::failed`].
    pub async fn reap(&self) -> Result<ReapReport> {
        let config = self.store.config();
        if config.key_prefix.is_empty() {
            return Err(CsrfError::Config("refusing to reap with an empty keyPrefix".into()));
        }
        let pattern = prefix_pattern(&config.key_prefix);
        let keys = self.store.cache().keys(&pattern).await?;

        let outcomes: Vec<_> = stream::iter(keys)
            .map(|key| async move {
                let outcome = self.store.compact(&key).await;
                (key, outcome)
            })
            .buffer_unordered(config.reap_concurrency.max(1))
            .collect()
            .await;

        let mut report = ReapReport {
            scanned: outcomes.len(),
            ..ReapReport::default()
        };

        for (key, outcome) in outcomes {
            match outcome {
                Ok(compaction) => {
                    report.removed += compaction.removed;
                    if compaction.rewritten {
                        report.compacted += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(storage_key = %key, error = %e, "Failed to compact token map");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Spawn the periodic sweep.
    ///
    /// The first sweep runs one `reap_frequency` after start. Each cycle runs
    /// in its own task; a failed or panicking cycle is logged and the next
    /// one still runs.
    pub fn start(self: Arc<Self>) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.store.config().reap_period();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period_secs = period.as_secs(), "CSRF token reaper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let reaper = self.clone();
                match tokio::spawn(async move { reaper.reap().await }).await {
                    Ok(Ok(report)) => {
                        if report.compacted > 0 || report.failed > 0 {
                            tracing::debug!(
                                scanned = report.scanned,
                                compacted = report.compacted,
                                removed = report.removed,
                                failed = report.failed,
                                "Reap cycle finished"
                            );
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Reap cycle failed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reap cycle aborted");
                    }
                }
            }

            tracing::info!("CSRF token reaper stopped");
        });

        ReaperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Control handle for a running reaper.
///
/// Dropping the handle also stops the loop after the current cycle.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "CSRF token reaper task failed");
        }
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CsrfConfig;
    use crate::providers::ManualClock;
    use crate::session::{RequestContext, SessionContext};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use warden_cache::{CacheError, CacheResult, CacheStore, InMemoryCache, Versioned};

    /// Delegates to memory but fails reads of "broken" keys and, optionally,
    /// the first enumeration.
    struct FaultyCache {
        inner: InMemoryCache,
        fail_first_scan: bool,
        scans: AtomicUsize,
    }

    impl FaultyCache {
        fn new(inner: InMemoryCache, fail_first_scan: bool) -> Self {
            Self {
                inner,
                fail_first_scan,
                scans: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CacheStore for FaultyCache {
        async fn get_versioned(&self, key: &str) -> CacheResult<Option<Versioned>> {
            if key.contains("broken") {
                return Err(CacheError::Connection("connection reset".into()));
            }
            self.inner.get_versioned(key).await
        }

        async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
            self.inner.set_json(key, value, ttl).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<u64>,
            value: String,
            ttl: Option<Duration>,
        ) -> CacheResult<bool> {
            self.inner.compare_and_swap(key, expected, value, ttl).await
        }

        async fn delete(&self, key: &str) -> CacheResult<bool> {
            self.inner.delete(key).await
        }

        async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
            let scan = self.scans.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_scan && scan == 0 {
                return Err(CacheError::Timeout(Duration::from_secs(1)));
            }
            self.inner.keys(pattern).await
        }
    }

    fn ctx(id: &str) -> RequestContext {
        RequestContext::with_session(SessionContext::new(id, id))
    }

    fn store_over(cache: Arc<dyn CacheStore>, clock: &ManualClock) -> TokenStore {
        TokenStore::new(cache, Arc::new(CsrfConfig::default().with_rotation_interval(15)))
            .with_clock(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_reap_drops_only_expired_records() {
        let cache = InMemoryCache::new();
        let clock = ManualClock::starting_now();
        let store = store_over(Arc::new(cache.clone()), &clock);
        let session = ctx("s1");

        store.generate(&session, Some("old"), false).await.unwrap();
        clock.advance(ChronoDuration::minutes(10));
        let live = store.generate(&session, Some("live"), false).await.unwrap();
        clock.advance(ChronoDuration::minutes(6));

        let reaper = TokenReaper::new(store.clone());
        let report = reaper.reap().await.unwrap();
        assert_eq!(
            report,
            ReapReport {
                scanned: 1,
                compacted: 1,
                removed: 1,
                failed: 0
            }
        );

        let raw = cache.get_json("csrf_tokens_s1").await.unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(stored.get("old").is_none());
        assert_eq!(stored["live"]["token"], live.as_str());
        assert!(store.verify(&session, &live, Some("live")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reap_empties_but_keeps_entry() {
        let cache = InMemoryCache::new();
        let clock = ManualClock::starting_now();
        let store = store_over(Arc::new(cache.clone()), &clock);

        store.generate(&ctx("s1"), None, false).await.unwrap();
        clock.advance(ChronoDuration::minutes(20));

        let reaper = TokenReaper::new(store);
        assert_eq!(reaper.reap().await.unwrap().removed, 1);
        assert_eq!(cache.get_json("csrf_tokens_s1").await.unwrap().as_deref(), Some("{}"));

        // An empty map stays empty and is not rewritten again.
        let report = reaper.reap().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.compacted, 0);
        assert_eq!(cache.get_json("csrf_tokens_s1").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_reap_ignores_foreign_keys_and_missing_sessions() {
        let cache = InMemoryCache::new();
        cache.set_json("session_s1", "{\"user\": 1}".into(), None).await.unwrap();
        let clock = ManualClock::starting_now();
        let reaper = TokenReaper::new(store_over(Arc::new(cache.clone()), &clock));

        assert_eq!(reaper.reap().await.unwrap(), ReapReport::default());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_reap_continues_past_failing_session() {
        let memory = InMemoryCache::new();
        let clock = ManualClock::starting_now();
        let store = store_over(Arc::new(memory.clone()), &clock);
        store.generate(&ctx("s1"), None, false).await.unwrap();
        store.generate(&ctx("s2"), None, false).await.unwrap();
        memory
            .set_json("csrf_tokens_broken", "{}".into(), None)
            .await
            .unwrap();
        clock.advance(ChronoDuration::minutes(30));

        let faulty: Arc<dyn CacheStore> = Arc::new(FaultyCache::new(memory.clone(), false));
        let reaper = TokenReaper::new(store_over(faulty, &clock));
        let report = reaper.reap().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.compacted, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_compacts_on_schedule() {
        let cache = InMemoryCache::new();
        let clock = ManualClock::starting_now();
        let store = store_over(Arc::new(cache.clone()), &clock);
        store.generate(&ctx("s1"), None, false).await.unwrap();
        clock.advance(ChronoDuration::minutes(16));

        let handle = Arc::new(TokenReaper::new(store)).start();

        // Nothing happens before the first period elapses.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_ne!(cache.get_json("csrf_tokens_s1").await.unwrap().as_deref(), Some("{}"));

        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..100 {
            if cache.get_json("csrf_tokens_s1").await.unwrap().as_deref() == Some("{}") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.get_json("csrf_tokens_s1").await.unwrap().as_deref(), Some("{}"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failed_cycle() {
        let faulty = Arc::new(FaultyCache::new(InMemoryCache::new(), true));
        let clock = ManualClock::starting_now();
        let reaper = Arc::new(TokenReaper::new(store_over(faulty.clone(), &clock)));

        let handle = reaper.start();
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(faulty.scans.load(Ordering::SeqCst) >= 2);
        assert!(!handle.is_finished());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_loop() {
        let faulty = Arc::new(FaultyCache::new(InMemoryCache::new(), false));
        let clock = ManualClock::starting_now();
        let reaper = Arc::new(TokenReaper::new(store_over(faulty.clone(), &clock)));

        drop(reaper.start());
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(faulty.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_prefix_never_sweeps_foreign_entries() {
        let cache = InMemoryCache::new();
        cache
            .set_json("user_profile_42", r#"{"name":"alice"}"#.into(), None)
            .await
            .unwrap();
        let store = TokenStore::new(
            Arc::new(cache.clone()),
            Arc::new(CsrfConfig::default().with_key_prefix("")),
        );

        let err = TokenReaper::new(store).reap().await.unwrap_err();
        assert!(matches!(err, CsrfError::Config(_)));
        assert_eq!(
            cache.get_json("user_profile_42").await.unwrap().as_deref(),
            Some(r#"{"name":"alice"}"#)
        );
    }

    #[tokio::test]
    async fn test_wildcard_prefix_matches_literally() {
        let cache = InMemoryCache::new();
        cache
            .set_json("csrf_other", r#"{"name":"alice"}"#.into(), None)
            .await
            .unwrap();
        let clock = ManualClock::starting_now();
        let store = TokenStore::new(
            Arc::new(cache.clone()),
            Arc::new(CsrfConfig::default().with_key_prefix("csrf*")),
        )
        .with_clock(Arc::new(clock.clone()));
        store.generate(&ctx("s1"), None, false).await.unwrap();
        clock.advance(ChronoDuration::hours(1));

        let report = TokenReaper::new(store).reap().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.compacted, 1);
        assert_eq!(cache.get_json("csrf*s1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(
            cache.get_json("csrf_other").await.unwrap().as_deref(),
            Some(r#"{"name":"alice"}"#)
        );
    }
}
