//! Common test infrastructure shared across integration tests.
//!
//! Provides an in-memory [`cache_service::RedisTransport`] implementation so
//! integration tests exercise the full manager/breaker/near-cache stack
//! without a live Redis deployment (invariant: the manager never assumes a
//! reachable backend).

use async_trait::async_trait;
use cache_service::breaker::{BreakerConfig, CircuitBreaker};
use cache_service::config::CacheServiceConfig;
use cache_service::error::CacheResult;
use cache_service::manager::CacheManager;
use cache_service::near_cache::{NearCache, NearCacheConfig};
use cache_service::traits::{RedisInfo, RedisTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct InMemoryTransport {
    store: Mutex<HashMap<String, Vec<u8>>>,
    healthy: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicU64,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            healthy: std::sync::atomic::AtomicBool::new(true),
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of trait methods invoked so far — lets tests assert that a
    /// validation failure never reached the transport at all.
    pub fn call_count(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn mark_called(&self) {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedisTransport for InMemoryTransport {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.mark_called();
        if !self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(cache_service::error::CacheError::ConnectionFail {
                node: "in_memory".to_string(),
                source: anyhow::anyhow!("simulated outage"),
            });
        }
        Ok(self.store.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8], _ttl: Option<Duration>) -> CacheResult<()> {
        self.mark_called();
        if !self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(cache_service::error::CacheError::ConnectionFail {
                node: "in_memory".to_string(),
                source: anyhow::anyhow!("simulated outage"),
            });
        }
        self.store.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.lock().unwrap().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.lock().unwrap().contains_key(key))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        Ok(true)
    }

    async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
        Ok(None)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let store = self.store.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| store.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>, Option<Duration>)]) -> CacheResult<usize> {
        let mut store = self.store.lock().unwrap();
        for (key, value, _) in entries {
            store.insert(key.clone(), value.clone());
        }
        Ok(entries.len())
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        let mut store = self.store.lock().unwrap();
        Ok(keys.iter().filter(|k| store.remove(*k).is_some()).count())
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        let mut keys: Vec<String> = self
            .store
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.truncate(limit);
        Ok(keys)
    }

    async fn flush_db(&self) -> CacheResult<()> {
        self.store.lock().unwrap().clear();
        Ok(())
    }

    async fn info(&self) -> CacheResult<RedisInfo> {
        Ok(RedisInfo {
            total_keys: self.store.lock().unwrap().len() as u64,
            ..RedisInfo::default()
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn primary_node(&self) -> &str {
        "in_memory"
    }
}

/// Build a [`CacheManager`] wired to an [`InMemoryTransport`], returning the
/// transport too so tests can flip `set_healthy` to exercise breaker paths.
#[must_use]
pub fn setup_manager() -> (CacheManager, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let near_cache = Arc::new(NearCache::new(NearCacheConfig::default()));
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let config = CacheServiceConfig::default();
    let manager = CacheManager::new(near_cache, transport.clone(), breaker, config);
    (manager, transport)
}

/// A manager with a breaker tuned to open quickly, for failure-path tests.
#[must_use]
pub fn setup_manager_with_fast_breaker() -> (CacheManager, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let near_cache = Arc::new(NearCache::new(NearCacheConfig::default()));
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        threshold: 1,
        timeout: Duration::from_millis(50),
        half_open_requests: 1,
    }));
    let config = CacheServiceConfig::default();
    let manager = CacheManager::new(near_cache, transport.clone(), breaker, config);
    (manager, transport)
}
