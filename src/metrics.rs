//! Prometheus metrics (`§4.D`).
//!
//! Metric names and labels mirror the Prometheus exposition the original
//! service has always produced, so existing dashboards and alerts keep
//! working unchanged. Names are registered once via `lazy_static` statics
//! holding the metric name string, following the same pattern the `metrics`
//! facade is used with elsewhere in the pack.

use lazy_static::lazy_static;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::near_cache::NearCache;
use crate::traits::RedisTransport;

lazy_static! {
    pub static ref CACHE_OPERATIONS_TOTAL: &'static str = {
        metrics::describe_counter!(
            "cache_operations_total",
            "Total number of cache operations by operation, status and service."
        );
        "cache_operations_total"
    };
    pub static ref CACHE_OPERATION_DURATION: &'static str = {
        metrics::describe_histogram!(
            "cache_operation_duration_seconds",
            metrics::Unit::Seconds,
            "Cache operation latency in seconds, by operation and service."
        );
        "cache_operation_duration_seconds"
    };
    pub static ref CACHE_HIT_RATE: &'static str = {
        metrics::describe_gauge!(
            "cache_hit_rate",
            "Near-cache hit rate in the range [0, 1], by service."
        );
        "cache_hit_rate"
    };
    pub static ref CACHE_MEMORY_USAGE_BYTES: &'static str = {
        metrics::describe_gauge!(
            "cache_memory_usage_bytes",
            "Memory used, by node and type."
        );
        "cache_memory_usage_bytes"
    };
    pub static ref CACHE_KEYS_TOTAL: &'static str = {
        metrics::describe_gauge!("cache_keys_total", "Number of keys resident, by node.");
        "cache_keys_total"
    };
    pub static ref CACHE_EVICTIONS_TOTAL: &'static str = {
        metrics::describe_counter!(
            "cache_evictions_total",
            "Total number of evictions, by policy and node."
        );
        "cache_evictions_total"
    };
    pub static ref CACHE_REPLICATION_LAG_SECONDS: &'static str = {
        metrics::describe_gauge!(
            "cache_replication_lag_seconds",
            "Replication lag in seconds, by primary and replica."
        );
        "cache_replication_lag_seconds"
    };
    pub static ref CIRCUIT_BREAKER_STATE: &'static str = {
        metrics::describe_gauge!(
            "circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=half_open, 2=open), by operation and node."
        );
        "circuit_breaker_state"
    };
    pub static ref CACHE_BATCH_OPERATIONS_TOTAL: &'static str = {
        metrics::describe_counter!(
            "cache_batch_operations_total",
            "Total number of batch operations, by operation and status."
        );
        "cache_batch_operations_total"
    };
    pub static ref CACHE_BATCH_OPERATION_SIZE: &'static str = {
        metrics::describe_histogram!(
            "cache_batch_operation_size",
            metrics::Unit::Count,
            "Member count per batch operation, by operation."
        );
        "cache_batch_operation_size"
    };
    pub static ref CACHE_CONNECTION_POOL_USAGE: &'static str = {
        metrics::describe_gauge!(
            "cache_connection_pool_usage",
            "Connection pool usage, by pool and metric (in_use, idle, max)."
        );
        "cache_connection_pool_usage"
    };
}

/// Force registration of every metric name/description at startup, so a
/// `/metrics` scrape before any traffic still lists every series.
pub fn init() {
    lazy_static::initialize(&CACHE_OPERATIONS_TOTAL);
    lazy_static::initialize(&CACHE_OPERATION_DURATION);
    lazy_static::initialize(&CACHE_HIT_RATE);
    lazy_static::initialize(&CACHE_MEMORY_USAGE_BYTES);
    lazy_static::initialize(&CACHE_KEYS_TOTAL);
    lazy_static::initialize(&CACHE_EVICTIONS_TOTAL);
    lazy_static::initialize(&CACHE_REPLICATION_LAG_SECONDS);
    lazy_static::initialize(&CIRCUIT_BREAKER_STATE);
    lazy_static::initialize(&CACHE_BATCH_OPERATIONS_TOTAL);
    lazy_static::initialize(&CACHE_BATCH_OPERATION_SIZE);
    lazy_static::initialize(&CACHE_CONNECTION_POOL_USAGE);
}

pub fn record_operation(operation: &str, status: &str, service: &str, elapsed: Duration) {
    metrics::counter!(*CACHE_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string(), "service" => service.to_string())
        .increment(1);
    metrics::histogram!(*CACHE_OPERATION_DURATION, "operation" => operation.to_string(), "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_batch_operation(operation: &str, status: &str, size: usize) {
    metrics::counter!(*CACHE_BATCH_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!(*CACHE_BATCH_OPERATION_SIZE, "operation" => operation.to_string())
        .record(size as f64);
}

pub fn record_hit_rate(service: &str, rate: f64) {
    metrics::gauge!(*CACHE_HIT_RATE, "service" => service.to_string()).set(rate);
}

fn breaker_state_value(state: BreakerState) -> f64 {
    match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    }
}

fn record_breaker_states(breaker: &CircuitBreaker) {
    for (operation, node, state) in breaker.snapshot() {
        metrics::gauge!(*CIRCUIT_BREAKER_STATE, "operation" => operation, "node" => node)
            .set(breaker_state_value(state));
    }
}

fn record_near_cache_gauges(near_cache: &NearCache, service: &str) {
    let stats = near_cache.stats();
    let total = stats.hits + stats.misses;
    let rate = if total == 0 {
        0.0
    } else {
        stats.hits as f64 / total as f64
    };
    record_hit_rate(service, rate);
    metrics::counter!(*CACHE_EVICTIONS_TOTAL, "policy" => "lru".to_string(), "node" => "near_cache".to_string())
        .increment(stats.evictions);
}

/// Pulls `INFO` from the transport and feeds the memory/key/replication
/// gauges; a failed `INFO` call just skips this tick rather than erroring
/// the whole refresh loop.
async fn record_redis_info_gauges(transport: &dyn RedisTransport, node: &str) {
    let Ok(info) = transport.info().await else {
        return;
    };
    metrics::gauge!(*CACHE_MEMORY_USAGE_BYTES, "node" => node.to_string(), "type" => "used".to_string())
        .set(info.used_memory_bytes as f64);
    metrics::gauge!(*CACHE_MEMORY_USAGE_BYTES, "node" => node.to_string(), "type" => "limit".to_string())
        .set(info.maxmemory_bytes as f64);
    metrics::gauge!(*CACHE_KEYS_TOTAL, "node" => node.to_string()).set(info.total_keys as f64);
    metrics::gauge!(*CACHE_REPLICATION_LAG_SECONDS, "primary" => node.to_string(), "replica" => "default".to_string())
        .set(info.replication_lag().as_secs_f64());
}

/// Background resampler matching the original `_update_metrics_loop`: every
/// `interval` it pulls gauges that only make sense as periodic snapshots
/// (breaker states, near-cache hit rate, Redis INFO-derived memory/key
/// counts) rather than push-on-every-call counters.
pub async fn spawn_refresh_loop(
    transport: std::sync::Arc<dyn RedisTransport>,
    breaker: std::sync::Arc<CircuitBreaker>,
    near_cache: std::sync::Arc<NearCache>,
    service_label: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                record_breaker_states(&breaker);
                record_near_cache_gauges(&near_cache, &service_label);
                record_redis_info_gauges(transport.as_ref(), transport.primary_node()).await;
                if !transport.health_check().await {
                    warn!(node = %transport.primary_node(), "metrics refresh observed unhealthy transport");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics refresh loop shutting down");
                    break;
                }
            }
        }
    }
}
