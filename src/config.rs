//! Configuration (`§6`), layered the way the rest of the ambient stack is:
//! a `config/default.toml`, an optional profile overlay selected by
//! `CACHE_SERVICE_PROFILE`, then environment variables prefixed
//! `CACHE_SERVICE` with a `__` separator taking final precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheServiceConfig {
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub performance: PerformanceSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub local_cache: LocalCacheSettings,
    #[serde(default)]
    pub acl: AclSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    Standalone,
    Sentinel,
    Cluster,
}

impl Default for RedisMode {
    fn default() -> Self {
        Self::Standalone
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default)]
    pub mode: RedisMode,

    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    pub replica_url: Option<String>,

    #[serde(default)]
    pub cluster_seed_urls: Vec<String>,

    #[serde(default)]
    pub sentinel_addresses: Vec<String>,
    pub sentinel_master_name: Option<String>,

    #[serde(default = "default_db")]
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            mode: RedisMode::default(),
            primary_url: default_primary_url(),
            replica_url: None,
            cluster_seed_urls: Vec::new(),
            sentinel_addresses: Vec::new(),
            sentinel_master_name: None,
            db: default_db(),
        }
    }
}

fn default_primary_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_db() -> i64 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_min_size")]
    pub min_size: u32,
    #[serde(default = "default_pool_max_size")]
    pub max_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: default_pool_min_size(),
            max_size: default_pool_max_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_pool_min_size() -> u32 {
    5
}
fn default_pool_max_size() -> u32 {
    20
}
fn default_connect_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            compression_enabled: default_compression_enabled(),
            compression_threshold_bytes: default_compression_threshold(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_compression_enabled() -> bool {
    true
}
fn default_compression_threshold() -> usize {
    1024
}
fn default_operation_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_breaker_half_open_requests")]
    pub half_open_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
            half_open_requests: default_breaker_half_open_requests(),
        }
    }
}

fn default_breaker_threshold() -> u32 {
    50
}
fn default_breaker_timeout_secs() -> u64 {
    30
}
fn default_breaker_half_open_requests() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheSettings {
    #[serde(default = "default_local_cache_size")]
    pub max_size: u64,
    #[serde(default = "default_local_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LocalCacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_local_cache_size(),
            ttl_secs: default_local_cache_ttl_secs(),
        }
    }
}

fn default_local_cache_size() -> u64 {
    10_000
}
fn default_local_cache_ttl_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_refresh_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_metrics_refresh_secs(),
        }
    }
}

fn default_metrics_refresh_secs() -> u64 {
    30
}

/// Per-service keyspace ACL: which first key-segments a service may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclSettings {
    #[serde(default = "default_allowed_keyspaces")]
    pub allowed_keyspaces: HashMap<String, HashSet<String>>,
}

impl Default for AclSettings {
    fn default() -> Self {
        Self {
            allowed_keyspaces: default_allowed_keyspaces(),
        }
    }
}

fn default_allowed_keyspaces() -> HashMap<String, HashSet<String>> {
    let mut map = HashMap::new();
    map.insert(
        "character".to_string(),
        to_set(&["characters", "sheets", "inventory", "journal"]),
    );
    map.insert(
        "campaign".to_string(),
        to_set(&["campaigns", "plots", "themes", "npcs"]),
    );
    map.insert(
        "image".to_string(),
        to_set(&["portraits", "maps", "items", "overlays"]),
    );
    map.insert("llm".to_string(), to_set(&["prompts", "completions", "embeddings"]));
    map.insert("auth".to_string(), to_set(&["sessions", "tokens", "permissions"]));
    map.insert(
        "catalog".to_string(),
        to_set(&["items", "spells", "equipment", "rules"]),
    );
    map
}

fn to_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl CacheServiceConfig {
    /// Load layered configuration: `config/default.toml` -> optional profile
    /// overlay named by `CACHE_SERVICE_PROFILE` -> `CACHE_SERVICE__*` env vars.
    pub fn load() -> Result<Self> {
        let profile = std::env::var("CACHE_SERVICE_PROFILE").unwrap_or_else(|_| "development".to_string());

        let raw = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{profile}")).required(false))
            .add_source(
                config::Environment::with_prefix("CACHE_SERVICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to build layered configuration")?;

        let config: Self = raw
            .try_deserialize()
            .context("failed to deserialize cache service configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that `serde` defaults alone can't express.
    pub fn validate(&self) -> Result<()> {
        match self.redis.mode {
            RedisMode::Cluster if self.redis.cluster_seed_urls.is_empty() => {
                anyhow::bail!("redis.mode is 'cluster' but no cluster_seed_urls were configured");
            }
            RedisMode::Sentinel
                if self.redis.sentinel_addresses.is_empty()
                    || self.redis.sentinel_master_name.is_none() =>
            {
                anyhow::bail!(
                    "redis.mode is 'sentinel' but sentinel_addresses or sentinel_master_name is missing"
                );
            }
            _ => {}
        }

        if self.pool.min_size > self.pool.max_size {
            anyhow::bail!("pool.min_size ({}) exceeds pool.max_size ({})", self.pool.min_size, self.pool.max_size);
        }

        if self.breaker.half_open_requests == 0 {
            anyhow::bail!("breaker.half_open_requests must be at least 1");
        }

        Ok(())
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.performance.default_ttl_secs)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.performance.operation_timeout_ms)
    }
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            redis: RedisSettings::default(),
            pool: PoolSettings::default(),
            performance: PerformanceSettings::default(),
            breaker: BreakerSettings::default(),
            local_cache: LocalCacheSettings::default(),
            acl: AclSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        CacheServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn cluster_mode_requires_seed_urls() {
        let mut config = CacheServiceConfig::default();
        config.redis.mode = RedisMode::Cluster;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_acl_matches_original_service_set() {
        let config = CacheServiceConfig::default();
        assert!(config.acl.allowed_keyspaces.contains_key("character"));
        assert!(config.acl.allowed_keyspaces["auth"].contains("sessions"));
    }
}
