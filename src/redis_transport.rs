//! Redis Transport (`§4.B`): connects to Redis in standalone, Sentinel or
//! cluster mode and exposes the byte-oriented operations the cache manager
//! needs, independent of which deployment topology backs them.
//!
//! Standalone and Sentinel both resolve to a primary [`ConnectionManager`]
//! plus an optional read-only replica connection; reads prefer the replica
//! when one is configured, writes always go to the primary. Cluster mode
//! hands slot routing off entirely to `redis`'s own cluster-aware client.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster_async::ClusterConnection;
use redis::sentinel::{SentinelClient, SentinelServerType};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{RedisMode, RedisSettings};
use crate::error::{CacheError, CacheResult};
use crate::traits::{RedisInfo, RedisTransport};

enum Routing {
    Standalone {
        primary: ConnectionManager,
        replica: Option<ConnectionManager>,
    },
    Sentinel {
        sentinel: Arc<Mutex<SentinelClient>>,
        master_name: String,
    },
    Cluster {
        conn: Arc<Mutex<ClusterConnection>>,
    },
}

pub struct RedisTransportImpl {
    routing: Routing,
    node_label: String,
}

impl RedisTransportImpl {
    /// Connect according to `settings.mode`, establishing the primary (and
    /// replica, where applicable) up front so a failed initial connection
    /// surfaces at startup rather than on first use.
    pub async fn connect(settings: &RedisSettings) -> CacheResult<Self> {
        match settings.mode {
            RedisMode::Standalone => Self::connect_standalone(settings).await,
            RedisMode::Sentinel => Self::connect_sentinel(settings).await,
            RedisMode::Cluster => Self::connect_cluster(settings).await,
        }
    }

    async fn connect_standalone(settings: &RedisSettings) -> CacheResult<Self> {
        let client = Client::open(settings.primary_url.as_str())
            .map_err(|e| CacheError::ConnectionFail {
                node: settings.primary_url.clone(),
                source: e.into(),
            })?;
        let primary = ConnectionManager::new(client).await.map_err(|e| CacheError::ConnectionFail {
            node: settings.primary_url.clone(),
            source: e.into(),
        })?;

        let replica = match &settings.replica_url {
            Some(url) => {
                let client = Client::open(url.as_str()).map_err(|e| CacheError::ConnectionFail {
                    node: url.clone(),
                    source: e.into(),
                })?;
                Some(ConnectionManager::new(client).await.map_err(|e| CacheError::ConnectionFail {
                    node: url.clone(),
                    source: e.into(),
                })?)
            }
            None => None,
        };

        info!(primary = %settings.primary_url, has_replica = replica.is_some(), "connected to Redis (standalone)");

        Ok(Self {
            routing: Routing::Standalone { primary, replica },
            node_label: settings.primary_url.clone(),
        })
    }

    async fn connect_sentinel(settings: &RedisSettings) -> CacheResult<Self> {
        let master_name = settings
            .sentinel_master_name
            .clone()
            .ok_or_else(|| CacheError::ConnectionFail {
                node: "sentinel".to_string(),
                source: anyhow::anyhow!("sentinel_master_name is required in sentinel mode"),
            })?;

        let sentinel = SentinelClient::build(
            settings.sentinel_addresses.clone(),
            master_name.clone(),
            None,
            SentinelServerType::Master,
        )
        .map_err(|e| CacheError::ConnectionFail {
            node: master_name.clone(),
            source: e.into(),
        })?;

        info!(master_name = %master_name, addresses = ?settings.sentinel_addresses, "connected to Redis (sentinel)");

        Ok(Self {
            routing: Routing::Sentinel {
                sentinel: Arc::new(Mutex::new(sentinel)),
                master_name: master_name.clone(),
            },
            node_label: master_name,
        })
    }

    async fn connect_cluster(settings: &RedisSettings) -> CacheResult<Self> {
        let client = redis::cluster::ClusterClient::new(settings.cluster_seed_urls.clone()).map_err(|e| {
            CacheError::ConnectionFail {
                node: "cluster".to_string(),
                source: e.into(),
            }
        })?;
        let conn = client.get_async_connection().await.map_err(|e| CacheError::ConnectionFail {
            node: "cluster".to_string(),
            source: e.into(),
        })?;

        info!(seeds = ?settings.cluster_seed_urls, "connected to Redis (cluster)");

        Ok(Self {
            routing: Routing::Cluster {
                conn: Arc::new(Mutex::new(conn)),
            },
            node_label: "cluster".to_string(),
        })
    }

    /// Connection used for reads: the replica when one is available,
    /// otherwise the primary. Sentinel re-resolves the master/replica set
    /// on every call so a failover is picked up without caller involvement.
    async fn read_conn(&self) -> CacheResult<ConnKind> {
        match &self.routing {
            Routing::Standalone { primary, replica } => {
                Ok(ConnKind::Standalone(replica.clone().unwrap_or_else(|| primary.clone())))
            }
            Routing::Sentinel { sentinel, .. } => {
                let mut guard = sentinel.lock().await;
                let conn = guard
                    .get_async_connection()
                    .await
                    .map_err(|e| CacheError::ConnectionFail {
                        node: "sentinel".to_string(),
                        source: e.into(),
                    })?;
                Ok(ConnKind::Standalone(conn))
            }
            Routing::Cluster { conn } => Ok(ConnKind::Cluster(conn.clone())),
        }
    }

    /// Connection used for writes: always the primary (Sentinel re-resolves
    /// the current master on every call so a failover doesn't strand writes
    /// on a demoted node).
    async fn write_conn(&self) -> CacheResult<ConnKind> {
        match &self.routing {
            Routing::Standalone { primary, .. } => Ok(ConnKind::Standalone(primary.clone())),
            Routing::Sentinel { sentinel, .. } => {
                let mut guard = sentinel.lock().await;
                let conn = guard
                    .get_async_connection()
                    .await
                    .map_err(|e| CacheError::ConnectionFail {
                        node: "sentinel".to_string(),
                        source: e.into(),
                    })?;
                Ok(ConnKind::Standalone(conn))
            }
            Routing::Cluster { conn } => Ok(ConnKind::Cluster(conn.clone())),
        }
    }
}

/// Either flavor of live connection a call ends up using.
enum ConnKind {
    Standalone(ConnectionManager),
    Cluster(Arc<Mutex<ClusterConnection>>),
}

#[async_trait]
impl RedisTransport for RedisTransportImpl {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        match self.read_conn().await? {
            ConnKind::Standalone(mut conn) => {
                let value: Option<Vec<u8>> = conn.get(key).await?;
                Ok(value)
            }
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                let value: Option<Vec<u8>> = guard.get(key).await?;
                Ok(value)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        match self.write_conn().await? {
            ConnKind::Standalone(mut conn) => {
                match ttl {
                    Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await?,
                    None => conn.set(key, value).await?,
                }
                Ok(())
            }
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                match ttl {
                    Some(ttl) => guard.set_ex(key, value, ttl.as_secs().max(1)).await?,
                    None => guard.set(key, value).await?,
                }
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self.write_conn().await? {
            ConnKind::Standalone(mut conn) => {
                let removed: u64 = conn.del(key).await?;
                Ok(removed > 0)
            }
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                let removed: u64 = guard.del(key).await?;
                Ok(removed > 0)
            }
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self.read_conn().await? {
            ConnKind::Standalone(mut conn) => Ok(conn.exists(key).await?),
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                Ok(guard.exists(key).await?)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        match self.write_conn().await? {
            ConnKind::Standalone(mut conn) => Ok(conn.expire(key, ttl.as_secs() as i64).await?),
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                Ok(guard.expire(key, ttl.as_secs() as i64).await?)
            }
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let ttl_secs: i64 = match self.read_conn().await? {
            ConnKind::Standalone(mut conn) => conn.ttl(key).await?,
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                guard.ttl(key).await?
            }
        };
        Ok(if ttl_secs > 0 {
            Some(Duration::from_secs(ttl_secs.unsigned_abs()))
        } else {
            None
        })
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let values: Vec<Option<Vec<u8>>> = match self.read_conn().await? {
            ConnKind::Standalone(mut conn) => conn.mget(keys).await?,
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                guard.mget(keys).await?
            }
        };
        let mut out = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            if let Some(bytes) = value {
                out.insert(key.clone(), bytes);
            }
        }
        Ok(out)
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>, Option<Duration>)]) -> CacheResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value, ttl) in entries {
            match ttl {
                Some(ttl) => {
                    pipe.set_ex(key, value, ttl.as_secs().max(1));
                }
                None => {
                    pipe.set(key, value);
                }
            }
        }
        match self.write_conn().await? {
            ConnKind::Standalone(mut conn) => {
                let _: () = pipe.query_async(&mut conn).await?;
            }
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                let _: () = pipe.query_async(&mut *guard).await?;
            }
        }
        Ok(entries.len())
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = match self.write_conn().await? {
            ConnKind::Standalone(mut conn) => conn.del(keys).await?,
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                guard.del(keys).await?
            }
        };
        Ok(removed as usize)
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = match self.read_conn().await? {
                ConnKind::Standalone(mut conn) => {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(200)
                        .query_async(&mut conn)
                        .await?
                }
                ConnKind::Cluster(conn) => {
                    let mut guard = conn.lock().await;
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(200)
                        .query_async(&mut *guard)
                        .await?
                }
            };
            cursor = next_cursor;
            keys.extend(batch);
            if keys.len() >= limit || cursor == 0 {
                break;
            }
        }
        keys.truncate(limit);
        debug!(pattern = %pattern, count = keys.len(), limit, "scanned keys matching pattern");
        Ok(keys)
    }

    async fn flush_db(&self) -> CacheResult<()> {
        match self.write_conn().await? {
            ConnKind::Standalone(mut conn) => {
                let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            }
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                let _: () = redis::cmd("FLUSHDB").query_async(&mut *guard).await?;
            }
        }
        warn!("flushed cache database");
        Ok(())
    }

    async fn info(&self) -> CacheResult<RedisInfo> {
        let raw: String = match self.read_conn().await? {
            ConnKind::Standalone(mut conn) => redis::cmd("INFO").query_async(&mut conn).await?,
            ConnKind::Cluster(conn) => {
                let mut guard = conn.lock().await;
                redis::cmd("INFO").query_async(&mut *guard).await?
            }
        };
        Ok(parse_info(&raw))
    }

    async fn health_check(&self) -> bool {
        let result: CacheResult<String> = match self.read_conn().await {
            Ok(ConnKind::Standalone(mut conn)) => redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(CacheError::from),
            Ok(ConnKind::Cluster(conn)) => {
                let mut guard = conn.lock().await;
                redis::cmd("PING").query_async(&mut *guard).await.map_err(CacheError::from)
            }
            Err(e) => Err(e),
        };
        result.is_ok()
    }

    fn primary_node(&self) -> &str {
        &self.node_label
    }
}

/// Parse the subset of `INFO memory|stats|replication|keyspace` this crate
/// cares about. Unknown/missing fields are left at their zero defaults
/// rather than failing the whole call — `INFO` output varies across Redis
/// versions and deployment modes.
fn parse_info(raw: &str) -> RedisInfo {
    let mut info = RedisInfo::default();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "used_memory" => info.used_memory_bytes = value.parse().unwrap_or(0),
            "maxmemory" => info.maxmemory_bytes = value.parse().unwrap_or(0),
            "keyspace_hits" => info.keyspace_hits = value.parse().unwrap_or(0),
            "keyspace_misses" => info.keyspace_misses = value.parse().unwrap_or(0),
            "role" => info.role = value.to_string(),
            "connected_slaves" => info.connected_slaves = value.parse().unwrap_or(0),
            "master_repl_offset" => info.master_repl_offset = value.parse().unwrap_or(0),
            "slave_repl_offset" => info.slave_repl_offset = value.parse().unwrap_or(0),
            _ if key.starts_with("db") => {
                for field in value.split(',') {
                    if let Some(count) = field.strip_prefix("keys=") {
                        info.total_keys += count.parse().unwrap_or(0);
                    }
                }
            }
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info_extracts_memory_keys_and_replication_fields() {
        let raw = "\
# Memory\r\nused_memory:104857600\r\nmaxmemory:0\r\n\
# Stats\r\nkeyspace_hits:42\r\nkeyspace_misses:8\r\n\
# Replication\r\nrole:master\r\nconnected_slaves:1\r\nmaster_repl_offset:1000\r\nslave_repl_offset:900\r\n\
# Keyspace\r\ndb0:keys=12,expires=3,avg_ttl=0\r\n";
        let info = parse_info(raw);
        assert_eq!(info.used_memory_bytes, 104_857_600);
        assert_eq!(info.keyspace_hits, 42);
        assert_eq!(info.keyspace_misses, 8);
        assert_eq!(info.role, "master");
        assert_eq!(info.connected_slaves, 1);
        assert_eq!(info.total_keys, 12);
        assert!(info.replication_lag() > Duration::from_secs(0));
    }
}
