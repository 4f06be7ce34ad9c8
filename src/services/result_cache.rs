use chrono::{DateTime, Utc};
use moka::future::Cache as MokaCache;
use moka::policy::EvictionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::{
    clock::Clock,
    db::{CacheKey, DurableCache},
    error::{AppError, AppResult},
    models::RecommendationList,
};

/// A cached value and the instant after which it reads as a miss
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: RecommendationList,
    expires_at: DateTime<Utc>,
}

type Flight = Arc<OnceCell<RecommendationList>>;

/// Two-tier cache of per-user recommendation lists.
///
/// Tier 1 is a bounded in-process LRU; tier 2 is the shared durable cache.
/// Expiry is always judged against the injected clock, in both tiers.
/// Failures of the durable tier are logged and treated as misses.
pub struct ResultCache {
    local: MokaCache<String, CacheEntry>,
    durable: Arc<dyn DurableCache>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, Flight>>,
}

impl ResultCache {
    pub fn new(
        durable: Arc<dyn DurableCache>,
        clock: Arc<dyn Clock>,
        capacity: u64,
        ttl: Duration,
    ) -> Self {
        let local = MokaCache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            local,
            durable,
            clock,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn key(user_id: &str) -> String {
        CacheKey::Recommendations(user_id.to_string()).to_string()
    }

    fn flights(&self) -> MutexGuard<'_, HashMap<String, Flight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Looks up a user's list in tier 1, then tier 2 (backfilling tier 1).
    /// `None` means the caller has to compute.
    pub async fn get(&self, user_id: &str) -> Option<RecommendationList> {
        let key = Self::key(user_id);
        let now = self.clock.now();

        if let Some(entry) = self.local.get(&key).await {
            if entry.expires_at > now {
                tracing::debug!(user_id = %user_id, "Local cache hit");
                return Some(entry.value);
            }
            self.local.invalidate(&key).await;
        }

        let raw = match self.durable.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend = self.durable.name(),
                    "Durable cache read failed, treating as miss"
                );
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Discarding unreadable cache entry");
                return None;
            }
        };
        if entry.expires_at <= now {
            return None;
        }

        tracing::debug!(user_id = %user_id, backend = self.durable.name(), "Durable cache hit");
        self.local.insert(key, entry.clone()).await;
        Some(entry.value)
    }

    /// Writes a list through both tiers
    pub async fn set(&self, user_id: &str, value: &RecommendationList, ttl: Duration) {
        let key = Self::key(user_id);
        let entry = CacheEntry {
            value: value.clone(),
            expires_at: self.expiry(ttl),
        };

        match serde_json::to_string(&entry) {
            Ok(serialized) => {
                if let Err(e) = self.durable.set(&key, serialized, ttl).await {
                    tracing::warn!(
                        error = %e,
                        backend = self.durable.name(),
                        "Durable cache write failed, caching locally only"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize cache entry"),
        }

        self.local.insert(key, entry).await;
    }

    /// Drops a user's list from both tiers and detaches any computation in flight
    pub async fn invalidate(&self, user_id: &str) {
        let key = Self::key(user_id);
        self.flights().remove(&key);
        self.local.invalidate(&key).await;

        if let Err(e) = self.durable.delete(&key).await {
            tracing::warn!(error = %e, key = %key, "Durable cache delete failed");
        }
    }

    /// Drops every entry whose key starts with `prefix`
    pub async fn invalidate_pattern(&self, prefix: &str) {
        self.flights().retain(|key, _| !key.starts_with(prefix));

        let stale: Vec<Arc<String>> = self
            .local
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.local.invalidate(key.as_str()).await;
        }

        if let Err(e) = self.durable.delete_prefix(prefix).await {
            tracing::warn!(error = %e, prefix = %prefix, "Durable cache prefix delete failed");
        }
        tracing::info!(prefix = %prefix, local_removed = stale.len(), "Cache entries invalidated");
    }

    /// Returns the cached list for `user_id`, or runs `compute` to produce it.
    ///
    /// Concurrent misses for the same user share a single run of `compute`
    /// and all receive its result. A result whose computation was invalidated
    /// while running is returned to its callers but not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        user_id: &str,
        compute: F,
    ) -> AppResult<RecommendationList>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<RecommendationList>>,
    {
        if let Some(hit) = self.get(user_id).await {
            return Ok(hit);
        }

        let key = Self::key(user_id);
        let flight = self
            .flights()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = flight
            .get_or_try_init(|| async {
                // The previous flight may have cached between our miss and now
                if let Some(hit) = self.get(user_id).await {
                    return Ok(hit);
                }

                let value = compute().await?;
                if self.is_current(&key, &flight) {
                    self.set(user_id, &value, self.ttl).await;
                } else {
                    tracing::debug!(user_id = %user_id, "Invalidated while computing, result not cached");
                }
                Ok::<_, AppError>(value)
            })
            .await
            .cloned();

        self.land(&key, &flight);
        result
    }

    fn is_current(&self, key: &str, flight: &Flight) -> bool {
        self.flights()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
    }

    fn land(&self, key: &str, flight: &Flight) {
        let mut flights = self.flights();
        if flights
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
        {
            flights.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{redis::RECOMMENDATIONS_PREFIX, MemoryCache};
    use crate::models::{Recommendation, ScoreBreakdown, Strategy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn list(user_id: &str, items: &[&str]) -> RecommendationList {
        RecommendationList {
            user_id: user_id.to_string(),
            strategy: Strategy::Hybrid,
            recommendations: items
                .iter()
                .map(|id| Recommendation {
                    item_id: id.to_string(),
                    score: 0.5,
                    breakdown: ScoreBreakdown::default(),
                })
                .collect(),
            omitted: vec![],
            generated_at: Utc::now(),
        }
    }

    fn cache_with(durable: Arc<dyn DurableCache>, clock: Arc<ManualClock>) -> ResultCache {
        ResultCache::new(durable, clock, 100, Duration::from_secs(1800))
    }

    struct UnreachableCache;

    #[async_trait]
    impl DurableCache for UnreachableCache {
        async fn get(&self, _key: &str) -> AppResult<Option<String>> {
            Err(AppError::CacheUnavailable(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> AppResult<()> {
            self.get("").await.map(|_| ())
        }

        async fn delete(&self, _key: &str) -> AppResult<()> {
            self.get("").await.map(|_| ())
        }

        async fn delete_prefix(&self, _prefix: &str) -> AppResult<()> {
            self.get("").await.map(|_| ())
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    /// Durable tier whose deletions take a while to land
    struct SlowDeleteCache {
        inner: MemoryCache,
        delay: Duration,
    }

    #[async_trait]
    impl DurableCache for SlowDeleteCache {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }

        async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete_prefix(prefix).await
        }

        fn name(&self) -> &'static str {
            "slow_delete"
        }
    }

    #[tokio::test]
    async fn test_reads_after_invalidate_never_backfill_stale_entries() {
        let clock = Arc::new(ManualClock::default());
        let durable = Arc::new(SlowDeleteCache {
            inner: MemoryCache::new(clock.clone()),
            delay: Duration::from_millis(30),
        });
        let cache = cache_with(durable, clock);
        let ttl = Duration::from_secs(60);

        cache.set("u1", &list("u1", &["b1"]), ttl).await;
        cache.invalidate("u1").await;
        assert_eq!(cache.get("u1").await, None);

        cache.set("u2", &list("u2", &["b2"]), ttl).await;
        cache.invalidate_pattern(RECOMMENDATIONS_PREFIX).await;
        assert_eq!(cache.get("u2").await, None);
        // The miss must not have repopulated tier 1
        assert_eq!(cache.get("u2").await, None);
    }

    #[tokio::test]
    async fn test_local_tier_evicts_least_recently_used() {
        let clock = Arc::new(ManualClock::default());
        let durable = Arc::new(MemoryCache::new(clock.clone()));
        let cache = ResultCache::new(durable.clone(), clock, 2, Duration::from_secs(1800));
        let ttl = Duration::from_secs(60);

        cache.set("u1", &list("u1", &["b1"]), ttl).await;
        let evicted = list("u2", &["b2"]);
        cache.set("u2", &evicted, ttl).await;
        cache.local.run_pending_tasks().await;
        // Touch u1 so u2 becomes the least recently used
        assert!(cache.get("u1").await.is_some());
        cache.local.run_pending_tasks().await;

        cache.set("u3", &list("u3", &["b3"]), ttl).await;
        cache.local.run_pending_tasks().await;

        assert!(cache.local.entry_count() <= 2);
        assert!(cache.local.contains_key("recs:u1"));
        assert!(cache.local.contains_key("recs:u3"));
        assert!(!cache.local.contains_key("recs:u2"));

        // The evicted user still resolves through the durable tier
        assert!(durable.get("recs:u2").await.unwrap().is_some());
        assert_eq!(cache.get("u2").await, Some(evicted));
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(Arc::new(MemoryCache::new(clock.clone())), clock.clone());
        let value = list("u1", &["b1"]);

        cache.set("u1", &value, Duration::from_secs(60)).await;
        assert_eq!(cache.get("u1").await, Some(value));

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(cache.get("u1").await, None);
    }

    #[tokio::test]
    async fn test_durable_hit_backfills_new_instance() {
        let clock = Arc::new(ManualClock::default());
        let durable: Arc<dyn DurableCache> = Arc::new(MemoryCache::new(clock.clone()));
        let value = list("u1", &["b1", "b2"]);

        cache_with(durable.clone(), clock.clone())
            .set("u1", &value, Duration::from_secs(60))
            .await;

        let fresh = cache_with(durable, clock);
        assert_eq!(fresh.get("u1").await, Some(value));
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let clock = Arc::new(ManualClock::default());
        let durable: Arc<dyn DurableCache> = Arc::new(MemoryCache::new(clock.clone()));
        let cache = cache_with(durable.clone(), clock);

        cache.set("u1", &list("u1", &["b1"]), Duration::from_secs(60)).await;
        cache.invalidate("u1").await;

        assert_eq!(cache.get("u1").await, None);
        assert_eq!(durable.get("recs:u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_removes_matching_users() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(Arc::new(MemoryCache::new(clock.clone())), clock);
        let ttl = Duration::from_secs(60);

        cache.set("u1", &list("u1", &["b1"]), ttl).await;
        cache.set("u2", &list("u2", &["b2"]), ttl).await;
        cache.set("x9", &list("x9", &["b3"]), ttl).await;

        cache.invalidate_pattern("recs:u").await;

        assert_eq!(cache.get("u1").await, None);
        assert_eq!(cache.get("u2").await, None);
        assert!(cache.get("x9").await.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_durable_tier_degrades_to_local() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(Arc::new(UnreachableCache), clock);
        let value = list("u1", &["b1"]);

        let computed = cache
            .get_or_compute("u1", || async { Ok(list("u1", &["b1"])) })
            .await
            .unwrap();
        assert_eq!(computed.recommendations, value.recommendations);
        assert!(cache.get("u1").await.is_some());
    }

    #[tokio::test]
    async fn test_compute_errors_are_not_cached() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(Arc::new(MemoryCache::new(clock.clone())), clock);

        let result = cache
            .get_or_compute("u1", || async { Err(AppError::Internal("boom".to_string())) })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get("u1").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compute_once() {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(cache_with(Arc::new(MemoryCache::new(clock.clone())), clock));
        let computations = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let computations = computations.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute("u1", || async move {
                            computations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(list("u1", &["b1", "b2"]))
                        })
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn test_invalidation_during_compute_skips_caching() {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(cache_with(Arc::new(MemoryCache::new(clock.clone())), clock));

        let inner = cache.clone();
        let value = cache
            .get_or_compute("u1", || async move {
                inner.invalidate("u1").await;
                Ok(list("u1", &["b1"]))
            })
            .await
            .unwrap();

        assert_eq!(value.recommendations.len(), 1);
        assert_eq!(cache.get("u1").await, None);
    }
}
