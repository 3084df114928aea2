//! Transport abstraction seam.
//!
//! [`crate::manager::CacheManager`] is generic over anything implementing
//! [`RedisTransport`], so tests can substitute an in-memory fake instead of
//! talking to a live Redis deployment (the manager's invariant that it never
//! assumes a live backend).

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::CacheResult;

/// Parsed subset of Redis `INFO`, enough to back `stats()`'s
/// memory/key/replication figures (`§4.B` `info()`).
#[derive(Debug, Clone, Default)]
pub struct RedisInfo {
    pub used_memory_bytes: u64,
    pub maxmemory_bytes: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub total_keys: u64,
    pub role: String,
    pub connected_slaves: u32,
    pub master_repl_offset: u64,
    pub slave_repl_offset: u64,
}

impl RedisInfo {
    /// Best-effort estimate of replica lag in seconds, derived the way the
    /// original service does: offset delta scaled by a nominal 1MiB/s
    /// replication throughput, zero when there's no measurable gap.
    #[must_use]
    pub fn replication_lag(&self) -> Duration {
        let behind = self.master_repl_offset.saturating_sub(self.slave_repl_offset);
        Duration::from_secs_f64(behind as f64 / 1_048_576.0)
    }
}

/// What the cache manager needs from a Redis deployment, independent of
/// whether it's standalone, Sentinel, or Cluster underneath.
#[async_trait]
pub trait RedisTransport: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<bool>;
    async fn exists(&self, key: &str) -> CacheResult<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>>;
    async fn set_many(
        &self,
        entries: &[(String, Vec<u8>, Option<Duration>)],
    ) -> CacheResult<usize>;
    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize>;

    /// Non-blocking `SCAN` iteration, stopping once `limit` results have
    /// been collected (or the keyspace is exhausted, whichever comes first).
    async fn scan_keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<String>>;
    async fn flush_db(&self) -> CacheResult<()>;

    /// Server `INFO`: memory, hit/miss counters, role and replication offsets.
    async fn info(&self) -> CacheResult<RedisInfo>;

    async fn health_check(&self) -> bool;

    /// Node identity used in metric labels and breaker keys (e.g. the
    /// primary's address, or the Sentinel-resolved master name).
    fn primary_node(&self) -> &str;
}
