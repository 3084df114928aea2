//! API surface types (`§4.F`/`§6`): request and response shapes for the
//! operations an HTTP layer would expose. This module only defines the
//! wire contract and the glue that turns a [`CacheManager`] call into it —
//! it does not stand up a server.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;
use crate::manager::{CacheManager, CacheStats, ComponentHealth, DEFAULT_SCAN_LIMIT};
use crate::value::Value;

/// Identifies the calling service for ACL and metrics labeling, carried as
/// the `X-Service-ID` header at the HTTP edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceId(pub String);

/// Uniform response envelope every endpoint returns. `status` is drawn from
/// the fixed vocabulary `hit|miss|success|failed|deleted|not_found` (`§6`),
/// never a generic ok/error pair.
#[derive(Debug, Clone, Serialize)]
pub struct CacheResponse<T> {
    pub status: &'static str,
    pub data: Option<T>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub error_code: Option<&'static str>,
    pub message: Option<String>,
}

impl<T> CacheResponse<T> {
    #[must_use]
    fn with_status(status: &'static str, data: Option<T>) -> Self {
        Self {
            status,
            data,
            metadata: ResponseMetadata {
                error_code: None,
                message: None,
            },
        }
    }

    #[must_use]
    pub fn success(data: T) -> Self {
        Self::with_status("success", Some(data))
    }

    #[must_use]
    pub fn from_error(error: &CacheError) -> Self {
        Self {
            status: "failed",
            data: None,
            metadata: ResponseMetadata {
                error_code: Some(error.code()),
                message: Some(error.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub value: Value,
    pub ttl_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub update_local: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResponseData {
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetQuery {
    #[serde(default = "default_true")]
    pub use_local: bool,
}

impl Default for GetQuery {
    fn default() -> Self {
        Self { use_local: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchGetRequest {
    pub keys: Vec<String>,
    #[serde(default = "default_true")]
    pub use_local: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSetEntry {
    pub key: String,
    pub value: Value,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSetRequest {
    pub entries: Vec<BatchSetEntry>,
    #[serde(default = "default_true")]
    pub update_local: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchDeleteRequest {
    pub keys: Vec<String>,
    #[serde(default = "default_true")]
    pub delete_local: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FlushRequest {
    pub pattern: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

/// `GET /health` (`§6`): aggregated component booleans. Overall status is
/// `healthy` iff every component is healthy, else `degraded`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponseData {
    pub overall: &'static str,
    pub near_cache_healthy: bool,
    pub primary_healthy: bool,
    pub breaker_healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponseData {
    pub near_cache_size: u64,
    pub near_cache_hits: u64,
    pub near_cache_misses: u64,
    pub near_cache_sets: u64,
    pub near_cache_deletes: u64,
    pub near_cache_evictions: u64,
    pub primary_healthy: bool,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub total_keys: u64,
    pub replication_lag_secs: f64,
}

impl From<CacheStats> for StatsResponseData {
    fn from(stats: CacheStats) -> Self {
        Self {
            near_cache_size: stats.near_cache.size,
            near_cache_hits: stats.near_cache.hits,
            near_cache_misses: stats.near_cache.misses,
            near_cache_sets: stats.near_cache.sets,
            near_cache_deletes: stats.near_cache.deletes,
            near_cache_evictions: stats.near_cache.evictions,
            primary_healthy: stats.primary_healthy,
            hit_rate: stats.hit_rate,
            miss_rate: stats.miss_rate,
            memory_used_bytes: stats.memory_used_bytes,
            memory_limit_bytes: stats.memory_limit_bytes,
            total_keys: stats.total_keys,
            replication_lag_secs: stats.replication_lag.as_secs_f64(),
        }
    }
}

/// Adapts a [`CacheManager`] to the request/response shapes above. A
/// concrete HTTP framework would route to these, translating
/// [`CacheError::http_status`] into the transport-level status code.
pub struct ApiHandlers<'a> {
    manager: &'a CacheManager,
}

impl<'a> ApiHandlers<'a> {
    #[must_use]
    pub fn new(manager: &'a CacheManager) -> Self {
        Self { manager }
    }

    pub async fn get(&self, service: &ServiceId, key: &str, query: GetQuery) -> CacheResponse<GetResponseData> {
        match self.manager.get(&service.0, key, query.use_local).await {
            Ok(Some(value)) => CacheResponse::with_status("hit", Some(GetResponseData { value })),
            Ok(None) => CacheResponse::with_status("miss", None),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn put(&self, service: &ServiceId, key: &str, request: SetRequest) -> CacheResponse<()> {
        let ttl = request.ttl_secs.map(Duration::from_secs);
        match self
            .manager
            .set(&service.0, key, request.value, ttl, request.update_local)
            .await
        {
            Ok(()) => CacheResponse::success(()),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn delete(&self, service: &ServiceId, key: &str) -> CacheResponse<bool> {
        match self.manager.delete(&service.0, key, true).await {
            Ok(true) => CacheResponse::with_status("deleted", Some(true)),
            Ok(false) => CacheResponse::with_status("not_found", Some(false)),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn batch_get(&self, service: &ServiceId, request: BatchGetRequest) -> CacheResponse<Vec<(String, Value)>> {
        match self.manager.get_many(&service.0, &request.keys, request.use_local).await {
            Ok(values) => CacheResponse::success(values.into_iter().collect()),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn batch_set(&self, service: &ServiceId, request: BatchSetRequest) -> CacheResponse<usize> {
        let entries: Vec<_> = request
            .entries
            .into_iter()
            .map(|e| (e.key, e.value, e.ttl_secs.map(Duration::from_secs)))
            .collect();
        match self.manager.set_many(&service.0, &entries, request.update_local).await {
            Ok(count) => CacheResponse::success(count),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn batch_delete(&self, service: &ServiceId, request: BatchDeleteRequest) -> CacheResponse<usize> {
        match self.manager.delete_many(&service.0, &request.keys, request.delete_local).await {
            Ok(count) => CacheResponse::success(count),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn pattern(&self, service: &ServiceId, pattern: &str) -> CacheResponse<Vec<String>> {
        match self.manager.scan_keys(&service.0, pattern, DEFAULT_SCAN_LIMIT).await {
            Ok(keys) => CacheResponse::success(keys),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn flush(&self, service: &ServiceId, request: FlushRequest) -> CacheResponse<()> {
        match self
            .manager
            .flush(&service.0, request.pattern.as_deref(), request.privileged)
            .await
        {
            Ok(()) => CacheResponse::success(()),
            Err(e) => CacheResponse::from_error(&e),
        }
    }

    pub async fn stats(&self) -> CacheResponse<StatsResponseData> {
        CacheResponse::success(self.manager.stats().await.into())
    }

    pub async fn health(&self) -> CacheResponse<HealthResponseData> {
        let health: ComponentHealth = self.manager.health().await;
        let overall = if health.near_cache_healthy && health.primary_healthy && health.breaker_healthy {
            "healthy"
        } else {
            "degraded"
        };
        CacheResponse::success(HealthResponseData {
            overall,
            near_cache_healthy: health.near_cache_healthy,
            primary_healthy: health.primary_healthy,
            breaker_healthy: health.breaker_healthy,
        })
    }
}

// `POST /reload` (`§4.F`) is intentionally not modeled here: this crate's
// `CacheServiceConfig` is fixed at `CacheManager::new` construction time, so
// a config reload is a process-level concern for whatever binary embeds
// this crate (rebuild the manager from a freshly-loaded `CacheServiceConfig`
// and swap it in behind an `ArcSwap` or similar), not a core operation.
