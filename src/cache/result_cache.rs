//! Cache-aside result cache over the shared store.
//!
//! # Responsibilities
//! - Typed get/set at the store edge (JSON in, JSON out)
//! - Category helpers with fixed TTLs and derived keys
//! - Hit/miss accounting
//!
//! # Design Decisions
//! - Lookups never fail: store and decode errors are misses
//! - Writes are best-effort: failures are logged and dropped
//! - The cache never computes values; callers populate it on a miss

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::keys::{derive_key, CacheCategory};
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::config::{CacheConfig, StoreConfig};
use crate::observability::metrics;
use crate::store::{self, MemoryStore, StateStore, StoreLink};

/// Label for lookups that bypass the category helpers.
const RAW_LOOKUP: &str = "raw";

#[derive(Debug)]
pub struct ResultCache {
    link: StoreLink,
    ttls: CacheConfig,
    stats: StatsCounter,
}

impl ResultCache {
    /// Cache over an existing store handle.
    pub fn new(store: Arc<dyn StateStore>, store_config: &StoreConfig, ttls: CacheConfig) -> Self {
        Self {
            link: StoreLink::new(store, "cache", store_config),
            ttls,
            stats: StatsCounter::default(),
        }
    }

    /// Per-process cache backed by an in-memory store.
    pub fn local(ttls: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), &StoreConfig::memory(), ttls)
    }

    /// Cache for the store described by `store_config`.
    ///
    /// Never fails: a disabled or unbuildable store yields a local cache and
    /// an unreachable one starts degraded.
    pub async fn connect(store_config: &StoreConfig, ttls: CacheConfig) -> Self {
        match store::from_config(store_config) {
            Ok(Some(store)) => {
                let cache = Self::new(store, store_config, ttls);
                cache.link.probe().await;
                cache
            }
            Ok(None) => Self::local(ttls),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot build shared store, cache runs local-only");
                Self::local(ttls)
            }
        }
    }

    /// Fetch and decode `key`. Any failure is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(RAW_LOOKUP, key).await
    }

    /// Encode and store `value` under `key` for `ttl`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cannot encode cache value, skipping");
                return;
            }
        };
        if let Err(e) = self.link.run("set", self.link.store().set(key, bytes, ttl)).await {
            tracing::debug!(key = %key, error = %e, "Cache write dropped");
        }
    }

    /// Delete one key; returns the number of keys removed.
    pub async fn delete(&self, key: &str) -> u64 {
        match self.link.run("delete", self.link.store().delete(key)).await {
            Ok(count) => count,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Cache delete dropped");
                0
            }
        }
    }

    /// Delete every key under `prefix` (`"search"` removes `search:*` only).
    pub async fn delete_matching(&self, prefix: &str) -> u64 {
        let pattern = if prefix.ends_with(':') {
            prefix.to_string()
        } else {
            format!("{prefix}:")
        };
        match self
            .link
            .run_bulk("delete_matching", self.link.store().delete_matching(&pattern))
            .await
        {
            Ok(count) => {
                tracing::info!(prefix = %pattern, deleted = count, "Cache entries invalidated");
                count
            }
            Err(e) => {
                tracing::warn!(prefix = %pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Store `value` under the key derived from `logical` in `category`.
    pub async fn put_category<K, V>(&self, category: CacheCategory, logical: &K, value: &V)
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        match derive_key(category, logical) {
            Ok(key) => self.set(&key, value, category.ttl(&self.ttls)).await,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Cannot derive cache key, skipping");
            }
        }
    }

    /// Fetch the value stored for `logical` in `category`.
    pub async fn get_category<K, V>(&self, category: CacheCategory, logical: &K) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        match derive_key(category, logical) {
            Ok(key) => self.lookup(category.prefix(), &key).await,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Cannot derive cache key");
                self.count(category.prefix(), false);
                None
            }
        }
    }

    pub async fn cache_search_results<Q, R>(&self, query: &Q, results: &R)
    where
        Q: Serialize + ?Sized,
        R: Serialize + ?Sized,
    {
        self.put_category(CacheCategory::Search, query, results).await
    }

    pub async fn get_search_results<Q, R>(&self, query: &Q) -> Option<R>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.get_category(CacheCategory::Search, query).await
    }

    pub async fn cache_intent<Q, I>(&self, query: &Q, intent: &I)
    where
        Q: Serialize + ?Sized,
        I: Serialize + ?Sized,
    {
        self.put_category(CacheCategory::Intent, query, intent).await
    }

    pub async fn get_intent<Q, I>(&self, query: &Q) -> Option<I>
    where
        Q: Serialize + ?Sized,
        I: DeserializeOwned,
    {
        self.get_category(CacheCategory::Intent, query).await
    }

    pub async fn cache_embedding(&self, text: &str, embedding: &[f32]) {
        self.put_category(CacheCategory::Embedding, text, embedding).await
    }

    pub async fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        self.get_category(CacheCategory::Embedding, text).await
    }

    /// Drop every entry of `category`.
    pub async fn invalidate(&self, category: CacheCategory) -> u64 {
        self.delete_matching(category.prefix()).await
    }

    /// Store reachability. Never fails.
    pub async fn health_check(&self) -> bool {
        self.link.probe().await
    }

    pub fn is_degraded(&self) -> bool {
        self.link.is_degraded()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub fn backend(&self) -> &'static str {
        self.link.store().backend()
    }

    async fn lookup<T: DeserializeOwned>(&self, category: &'static str, key: &str) -> Option<T> {
        let bytes = match self.link.run("get", self.link.store().get(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) | Err(_) => {
                self.count(category, false);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.count(category, true);
                Some(value)
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Undecodable cache entry, treating as miss");
                self.count(category, false);
                None
            }
        }
    }

    fn count(&self, category: &'static str, hit: bool) {
        self.stats.record(hit);
        metrics::record_cache_lookup(category, hit);
        metrics::record_cache_hit_rate(self.stats.snapshot().hit_rate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::{json, Value};

    fn cache() -> (ResultCache, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let cache = ResultCache::new(store.clone(), &StoreConfig::memory(), CacheConfig::default());
        (cache, store, clock)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _, _) = cache();
        let payload = json!({"items": ["a", "b"], "total": 2, "meta": {}});
        cache.set("q1", &payload, Duration::from_secs(5)).await;
        assert_eq!(cache.get::<Value>("q1").await, Some(payload));
        assert_eq!(cache.get::<Value>("missing").await, None);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_wrong_shape_is_a_miss() {
        let (cache, _, _) = cache();
        cache.set("n", &42, Duration::from_secs(5)).await;
        assert_eq!(cache.get::<Vec<String>>("n").await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_category_ttl_applied() {
        let (cache, store, clock) = cache();
        cache.cache_intent("play jazz", &json!({"action": "play"})).await;
        let key = derive_key(CacheCategory::Intent, "play jazz").unwrap();
        assert_eq!(store.ttl(&key), Some(Duration::from_secs(600)));

        clock.advance(Duration::from_secs(601));
        assert_eq!(cache.get_intent::<_, Value>("play jazz").await, None);
    }

    #[tokio::test]
    async fn test_delete_matching_respects_separator() {
        let (cache, _, _) = cache();
        cache.set("search:a", &1, Duration::from_secs(60)).await;
        cache.set("search:b", &2, Duration::from_secs(60)).await;
        cache.set("searches:c", &3, Duration::from_secs(60)).await;

        assert_eq!(cache.delete_matching("search").await, 2);
        assert_eq!(cache.get::<i32>("searches:c").await, Some(3));
        assert_eq!(cache.delete("searches:c").await, 1);
        assert_eq!(cache.delete("searches:c").await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_a_miss() {
        let (cache, store, _) = cache();
        cache.set("k", &"v", Duration::from_secs(60)).await;
        store.set_available(false);

        assert_eq!(cache.get::<String>("k").await, None);
        cache.set("k2", &"v", Duration::from_secs(60)).await;
        assert!(!cache.health_check().await);
        assert!(cache.is_degraded());
        assert_eq!(cache.stats().misses, 1);
    }
}
