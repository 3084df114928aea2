//! Near-Cache — bounded, in-process TTL+LRU cache (`§4.A`).
//!
//! Fronts the shared Redis far-cache to cut tail latency and backend load
//! for recently seen keys. Backed by [`moka::future::Cache`], which already
//! gives expected O(1) get/set/delete, LRU eviction under capacity pressure,
//! and safe concurrent access — the same backend the teacher repo uses for
//! its L1 tier.

use crate::value::Value;
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NearCacheConfig {
    pub max_capacity: u64,
    pub default_ttl: Duration,
}

impl Default for NearCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            default_ttl: Duration::from_secs(60),
        }
    }
}

/// Snapshot of near-cache counters (`§4.A` `stats()`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NearCacheStats {
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
}

pub struct NearCache {
    cache: Cache<String, Entry>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl NearCache {
    #[must_use]
    pub fn new(config: NearCacheConfig) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let listener_evictions = evictions.clone();
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl.max(Duration::from_secs(1)) * 60)
            .eviction_listener(move |_key, _value, cause| {
                // Only capacity/LRU-driven removals count as evictions; an
                // explicit `delete()`/`clear()` invalidation is not one.
                if matches!(cause, RemovalCause::Size) {
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        Self {
            cache,
            default_ttl: config.default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions,
        }
    }

    /// Returns the cached value if present and unexpired; never returns a
    /// stale entry. An expired hit is treated as a miss and evicted eagerly.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace. Moka evicts by LRU once at capacity; this call
    /// never surfaces an error even if the insert is effectively dropped.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn delete(&self, key: &str) -> bool {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key).await;
        if existed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        existed
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> NearCacheStats {
        NearCacheStats {
            size: self.cache.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_then_miss_after_ttl_expiry() {
        let cache = NearCache::new(NearCacheConfig {
            max_capacity: 100,
            default_ttl: Duration::from_millis(20),
        });
        cache
            .set("k", Value::Json(serde_json::json!("v")), None)
            .await;
        assert_eq!(cache.get("k").await, Some(Value::Json(serde_json::json!("v"))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn delete_reports_whether_key_existed() {
        let cache = NearCache::new(NearCacheConfig::default());
        assert!(!cache.delete("missing").await);
        cache.set("present", Value::Json(serde_json::json!(1)), None).await;
        assert!(cache.delete("present").await);
    }

    #[tokio::test]
    async fn stats_count_capacity_evictions_but_not_explicit_deletes() {
        let cache = NearCache::new(NearCacheConfig {
            max_capacity: 2,
            default_ttl: Duration::from_secs(60),
        });
        cache.set("a", Value::Json(serde_json::json!(1)), None).await;
        cache.set("b", Value::Json(serde_json::json!(2)), None).await;
        cache.set("c", Value::Json(serde_json::json!(3)), None).await;
        cache.cache.run_pending_tasks().await;
        assert!(cache.stats().evictions >= 1);

        cache.delete("c").await;
        let after_delete = cache.stats().evictions;
        cache.cache.run_pending_tasks().await;
        assert_eq!(cache.stats().evictions, after_delete, "explicit delete must not be counted as an eviction");
    }

    #[tokio::test]
    async fn stats_reflect_hits_and_misses() {
        let cache = NearCache::new(NearCacheConfig::default());
        cache.set("a", Value::Json(serde_json::json!(1)), None).await;
        let _ = cache.get("a").await;
        let _ = cache.get("missing").await;
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }
}
