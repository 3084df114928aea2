//! Cache Manager (`§4.E`): the façade every caller goes through. Composes
//! the near-cache, the Redis transport, the circuit breaker and the metrics
//! sink, and is solely responsible for key validation, the near-cache/far-cache
//! hierarchy, and turning transport failures into the stable error taxonomy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::config::CacheServiceConfig;
use crate::error::{CacheError, CacheResult};
use crate::near_cache::NearCache;
use crate::traits::{RedisInfo, RedisTransport};
use crate::value::{self, CompressionPolicy, Value};

/// Default `scan_keys` result cap when a caller doesn't specify one
/// (`§4.B`: "stops at `limit` results").
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// Aggregate stats surfaced by `get_stats` (`§4.F` `GET /stats`).
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub near_cache: crate::near_cache::NearCacheStats,
    pub primary_healthy: bool,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub total_keys: u64,
    pub replication_lag: Duration,
    pub redis_info: RedisInfo,
}

/// Component-level booleans backing the aggregated `GET /health` surface.
#[derive(Debug, Clone, Copy)]
pub struct ComponentHealth {
    pub near_cache_healthy: bool,
    pub primary_healthy: bool,
    pub breaker_healthy: bool,
}

pub struct CacheManager {
    near_cache: Arc<NearCache>,
    transport: Arc<dyn RedisTransport>,
    breaker: Arc<CircuitBreaker>,
    config: CacheServiceConfig,
}

impl CacheManager {
    #[must_use]
    pub fn new(
        near_cache: Arc<NearCache>,
        transport: Arc<dyn RedisTransport>,
        breaker: Arc<CircuitBreaker>,
        config: CacheServiceConfig,
    ) -> Self {
        Self {
            near_cache,
            transport,
            breaker,
            config,
        }
    }

    fn compression_policy(&self) -> CompressionPolicy {
        CompressionPolicy {
            enabled: self.config.performance.compression_enabled,
            threshold_bytes: self.config.performance.compression_threshold_bytes,
        }
    }

    /// Validate key shape and keyspace ACL (`§4.E` validation order:
    /// empty -> format -> ACL). `service` is the caller's identity
    /// (`X-Service-ID` at the API edge). Keys have the form
    /// `service:keyspace[:identifier...]`; the second segment is the
    /// keyspace checked against the caller's permitted set.
    fn validate_key(&self, service: &str, key: &str) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::KeyInvalid("key must not be empty".to_string()));
        }

        let segments: Vec<&str> = key.split(':').collect();
        if segments.len() < 2 || segments[0].is_empty() || segments[1].is_empty() {
            return Err(CacheError::KeyInvalid(format!(
                "key '{key}' must have the form 'service:keyspace[:identifier...]'"
            )));
        }
        let keyspace = segments[1];

        match self.config.acl.allowed_keyspaces.get(service) {
            Some(allowed) if allowed.contains(keyspace) => Ok(()),
            _ => Err(CacheError::KeyspaceForbidden {
                service: service.to_string(),
                keyspace: keyspace.to_string(),
            }),
        }
    }

    /// Validate a scan/flush glob pattern: it must be scoped to the caller's
    /// own service prefix. Unlike [`Self::validate_key`], the keyspace
    /// segment is not checked against the ACL set — a pattern legitimately
    /// ranges over every keyspace a service owns (e.g. a service-wide flush).
    fn validate_pattern(&self, service: &str, pattern: &str) -> CacheResult<()> {
        if pattern.is_empty() {
            return Err(CacheError::KeyInvalid("pattern must not be empty".to_string()));
        }
        let prefix = format!("{service}:");
        if !pattern.starts_with(&prefix) {
            return Err(CacheError::KeyspaceForbidden {
                service: service.to_string(),
                keyspace: pattern.to_string(),
            });
        }
        Ok(())
    }

    async fn record<T>(&self, operation: &str, service: &str, started: Instant, result: &CacheResult<T>) {
        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_operation(operation, status, service, started.elapsed());
    }

    /// Bounds a single transport round-trip to `operation_timeout` (`§5`).
    /// Runs inside the breaker-wrapped closure so a timeout still counts as
    /// a breaker failure rather than silently bypassing it.
    async fn timeout_op<T, Fut>(&self, operation: &str, fut: Fut) -> CacheResult<T>
    where
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        let budget = self.config.operation_timeout();
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                operation: operation.to_string(),
                elapsed_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// `get(key, service?, use_local=true)` (`§4.E`). When `use_local` is
    /// `false` the near-cache is neither read nor populated, so a caller can
    /// force a round-trip to the shared tier (scenario: read-your-writes
    /// across instances).
    pub async fn get(&self, service: &str, key: &str, use_local: bool) -> CacheResult<Option<Value>> {
        let started = Instant::now();
        self.validate_key(service, key)?;

        if use_local {
            if let Some(value) = self.near_cache.get(key).await {
                self.record("get", service, started, &Ok::<_, CacheError>(())).await;
                return Ok(Some(value));
            }
        }

        let node = self.transport.primary_node().to_string();
        let result = self
            .breaker
            .call("get", &node, || async {
                let bytes = self.timeout_op("get", async { self.transport.get(key).await }).await?;
                match bytes {
                    Some(bytes) => Ok(Some(value::decode(&bytes)?)),
                    None => Ok(None),
                }
            })
            .await;

        self.record("get", service, started, &result).await;

        if use_local {
            if let Ok(Some(ref value)) = result {
                self.near_cache
                    .set(key, value.clone(), Some(Duration::from_secs(self.config.local_cache.ttl_secs)))
                    .await;
            }
        }
        result
    }

    /// `set(key, value, ttl?, service?, update_local=true)` (`§4.E`).
    pub async fn set(
        &self,
        service: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        update_local: bool,
    ) -> CacheResult<()> {
        let started = Instant::now();
        self.validate_key(service, key)?;

        if value.is_null() {
            return Err(CacheError::KeyInvalid(format!(
                "key '{key}': caching an explicit null value is not permitted"
            )));
        }

        let ttl = ttl.or(Some(self.config.default_ttl()));
        let bytes = value::encode(&value, self.compression_policy())?;
        let node = self.transport.primary_node().to_string();

        let result = self
            .breaker
            .call("set", &node, || async {
                self.timeout_op("set", async { self.transport.set(key, &bytes, ttl).await }).await
            })
            .await;

        self.record("set", service, started, &result).await;

        if result.is_ok() && update_local {
            self.near_cache.set(key, value, ttl).await;
        }
        result
    }

    /// `delete(key, service?, delete_local=true)` (`§4.E`). The near-cache
    /// delete always runs when `delete_local` is set, independent of the
    /// backend outcome: a stale near-cache entry surviving a failed backend
    /// delete would keep serving data the caller believes is gone.
    pub async fn delete(&self, service: &str, key: &str, delete_local: bool) -> CacheResult<bool> {
        let started = Instant::now();
        self.validate_key(service, key)?;

        let node = self.transport.primary_node().to_string();
        let result = self
            .breaker
            .call("delete", &node, || async {
                self.timeout_op("delete", async { self.transport.delete(key).await }).await
            })
            .await;

        self.record("delete", service, started, &result).await;

        if delete_local {
            self.near_cache.delete(key).await;
        }
        result
    }

    /// `get_many(keys, service?, use_local=true)` (`§4.E`).
    pub async fn get_many(
        &self,
        service: &str,
        keys: &[String],
        use_local: bool,
    ) -> CacheResult<HashMap<String, Value>> {
        let started = Instant::now();
        for key in keys {
            self.validate_key(service, key)?;
        }

        let mut out = HashMap::with_capacity(keys.len());
        let mut remaining = Vec::new();
        for key in keys {
            if use_local {
                if let Some(value) = self.near_cache.get(key).await {
                    out.insert(key.clone(), value);
                    continue;
                }
            }
            remaining.push(key.clone());
        }

        if !remaining.is_empty() {
            let node = self.transport.primary_node().to_string();
            let fetched = self
                .breaker
                .call("get_many", &node, || async {
                    self.timeout_op("get_many", async { self.transport.get_many(&remaining).await }).await
                })
                .await;

            match fetched {
                Ok(bytes_by_key) => {
                    let failed = remaining.len() - bytes_by_key.len();
                    for (key, bytes) in bytes_by_key {
                        match value::decode(&bytes) {
                            Ok(value) => {
                                if use_local {
                                    self.near_cache
                                        .set(&key, value.clone(), Some(Duration::from_secs(self.config.local_cache.ttl_secs)))
                                        .await;
                                }
                                out.insert(key, value);
                            }
                            Err(e) => warn!(key = %key, error = %e, "skipping undecodable batch member"),
                        }
                    }
                    crate::metrics::record_batch_operation("get_many", "success", keys.len());
                    if failed > 0 {
                        debug!(missing = failed, "get_many returned fewer members than requested");
                    }
                }
                Err(e) => {
                    crate::metrics::record_batch_operation("get_many", "error", keys.len());
                    self.record("get_many", service, started, &Err::<(), _>(CacheError::BatchPartial {
                        operation: "get_many".to_string(),
                        total: keys.len(),
                        failed: remaining.len(),
                    }))
                    .await;
                    return Err(e);
                }
            }
        }

        self.record("get_many", service, started, &Ok::<_, CacheError>(())).await;
        Ok(out)
    }

    /// `set_many(items, ttl?, service?, update_local=true)` (`§4.E`).
    pub async fn set_many(
        &self,
        service: &str,
        entries: &[(String, Value, Option<Duration>)],
        update_local: bool,
    ) -> CacheResult<usize> {
        let started = Instant::now();
        for (key, value, _) in entries {
            self.validate_key(service, key)?;
            if value.is_null() {
                return Err(CacheError::KeyInvalid(format!(
                    "key '{key}': caching an explicit null value is not permitted"
                )));
            }
        }

        let policy = self.compression_policy();
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value, ttl) in entries {
            let bytes = value::encode(value, policy)?;
            let ttl = ttl.or(Some(self.config.default_ttl()));
            encoded.push((key.clone(), bytes, ttl));
        }

        let node = self.transport.primary_node().to_string();
        let result = self
            .breaker
            .call("set_many", &node, || async {
                self.timeout_op("set_many", async { self.transport.set_many(&encoded).await }).await
            })
            .await;

        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_batch_operation("set_many", status, entries.len());
        self.record("set_many", service, started, &result).await;

        if result.is_ok() && update_local {
            for (key, value, ttl) in entries {
                self.near_cache.set(key, value.clone(), ttl.or(Some(self.config.default_ttl()))).await;
            }
        }
        result
    }

    /// `delete_many(keys, service?, delete_local=true)` (`§4.E`). Near-cache
    /// deletes run regardless of backend outcome, matching `delete`.
    pub async fn delete_many(&self, service: &str, keys: &[String], delete_local: bool) -> CacheResult<usize> {
        let started = Instant::now();
        for key in keys {
            self.validate_key(service, key)?;
        }

        let node = self.transport.primary_node().to_string();
        let result = self
            .breaker
            .call("delete_many", &node, || async {
                self.timeout_op("delete_many", async { self.transport.delete_many(keys).await }).await
            })
            .await;

        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_batch_operation("delete_many", status, keys.len());
        self.record("delete_many", service, started, &result).await;

        if delete_local {
            for key in keys {
                self.near_cache.delete(key).await;
            }
        }
        result
    }

    /// Scan keys by glob pattern (`§4.F` `GET /pattern/{pattern}`), stopping
    /// at `limit` results (`§4.B`). The pattern must be scoped to the
    /// caller's own `service:` prefix; beyond that it isn't filtered by
    /// per-keyspace ACL, matching the original's behavior of trusting a
    /// pattern supplied by an already-authorized caller.
    pub async fn scan_keys(&self, service: &str, pattern: &str, limit: usize) -> CacheResult<Vec<String>> {
        self.validate_pattern(service, pattern)?;

        let node = self.transport.primary_node().to_string();
        self.breaker
            .call("scan_keys", &node, || async {
                self.timeout_op("scan_keys", async { self.transport.scan_keys(pattern, limit).await }).await
            })
            .await
    }

    /// `flush(service?, pattern?)` (`§4.E`): service-scoped by default —
    /// scans and deletes only that service's own keys (`service:*`, or
    /// `service:pattern*` when `pattern` narrows it further), mirroring the
    /// original's selective flush. `privileged` is the extension point
    /// `§4.E` validation rule 4 requires for an unscoped `FLUSHDB`; no
    /// privilege check is implemented here, callers gate it at the API edge.
    pub async fn flush(&self, service: &str, pattern: Option<&str>, privileged: bool) -> CacheResult<()> {
        if privileged {
            let node = self.transport.primary_node().to_string();
            let result = self
                .breaker
                .call("flush", &node, || async {
                    self.timeout_op("flush", async { self.transport.flush_db().await }).await
                })
                .await;
            if result.is_ok() {
                self.near_cache.clear().await;
            }
            return result;
        }

        let scan_pattern = match pattern {
            Some(p) => format!("{service}:{p}*"),
            None => format!("{service}:*"),
        };
        let keys = self.scan_keys(service, &scan_pattern, usize::MAX).await?;
        if keys.is_empty() {
            return Ok(());
        }
        self.delete_many(service, &keys, true).await?;
        Ok(())
    }

    /// `stats()` (`§4.E`): near-cache counters plus Redis-derived memory,
    /// key count and replication figures from `info()`. Falls back to the
    /// zeroed `RedisInfo` default when `info()` itself fails — a stats call
    /// should degrade, not error, when the backend is unreachable.
    pub async fn stats(&self) -> CacheStats {
        let near_cache = self.near_cache.stats();
        let total = near_cache.hits + near_cache.misses;
        let hit_rate = if total == 0 { 0.0 } else { near_cache.hits as f64 / total as f64 };

        let redis_info = self.transport.info().await.unwrap_or_default();
        let primary_healthy = self.transport.health_check().await;

        CacheStats {
            near_cache,
            primary_healthy,
            hit_rate,
            miss_rate: 1.0 - hit_rate,
            memory_used_bytes: redis_info.used_memory_bytes,
            memory_limit_bytes: redis_info.maxmemory_bytes,
            total_keys: redis_info.total_keys,
            replication_lag: redis_info.replication_lag(),
            redis_info,
        }
    }

    /// Aggregated health for `GET /health` (`§6`): healthy iff the backend
    /// responds and no (operation, node) breaker is open.
    pub async fn health(&self) -> ComponentHealth {
        let primary_healthy = self.transport.health_check().await;
        let breaker_healthy = self
            .breaker
            .snapshot()
            .iter()
            .all(|(_, _, state)| !matches!(state, crate::breaker::BreakerState::Open));
        ComponentHealth {
            near_cache_healthy: true,
            primary_healthy,
            breaker_healthy,
        }
    }

    #[must_use]
    pub fn permitted_keyspaces(&self, service: &str) -> HashSet<String> {
        self.config
            .acl
            .allowed_keyspaces
            .get(service)
            .cloned()
            .unwrap_or_default()
    }
}
