//! Cache Service
//!
//! A distributed cache service core fronting Redis in standalone, Sentinel
//! or Cluster mode, with a near-cache/far-cache hierarchy, a per-node
//! circuit breaker, keyspace ACL enforcement, and Prometheus metrics.
//!
//! # Architecture
//!
//! ```text
//! Request → Near-Cache (in-process) → Redis Transport → Circuit Breaker
//!           ↓ Hit                     ↓ Hit              ↓ Open: reject fast
//!           Return                    Populate near-cache  Return BreakerOpen
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cache_service::config::CacheServiceConfig;
//! use cache_service::near_cache::{NearCache, NearCacheConfig};
//! use cache_service::breaker::{CircuitBreaker, BreakerConfig};
//! use cache_service::redis_transport::RedisTransportImpl;
//! use cache_service::manager::CacheManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheServiceConfig::load()?;
//!     let transport = Arc::new(RedisTransportImpl::connect(&config.redis).await?);
//!     let near_cache = Arc::new(NearCache::new(NearCacheConfig {
//!         max_capacity: config.local_cache.max_size,
//!         default_ttl: std::time::Duration::from_secs(config.local_cache.ttl_secs),
//!     }));
//!     let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
//!         threshold: config.breaker.threshold,
//!         timeout: std::time::Duration::from_secs(config.breaker.timeout_secs),
//!         half_open_requests: config.breaker.half_open_requests,
//!     }));
//!
//!     let manager = CacheManager::new(near_cache, transport, breaker, config);
//!     manager.set("character", "character:123", serde_json::json!({"hp": 10}).into(), None, true).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod breaker;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod near_cache;
pub mod redis_transport;
pub mod traits;
pub mod value;

pub use async_trait::async_trait;
pub use error::{CacheError, CacheResult};
pub use manager::CacheManager;
pub use traits::RedisTransport;
pub use value::Value;
