//! End-to-end scenarios against an in-memory transport.

mod common;

use cache_service::error::CacheError;
use cache_service::value::Value;
use std::time::Duration;

fn json(v: serde_json::Value) -> Value {
    Value::Json(v)
}

#[tokio::test]
async fn hit_path_returns_the_stored_value() {
    let (manager, transport) = common::setup_manager();
    let encoded = cache_service::value::encode(
        &json(serde_json::json!({"hp": 30})),
        cache_service::value::CompressionPolicy::disabled(),
    )
    .unwrap();
    transport.set("character:sheets:42", &encoded, None).await.unwrap();

    let result = manager.get("character", "character:sheets:42", true).await.unwrap();
    assert_eq!(result, Some(json(serde_json::json!({"hp": 30}))));
}

#[tokio::test]
async fn miss_then_fill_then_hit() {
    let (manager, _transport) = common::setup_manager();

    assert_eq!(manager.get("character", "character:sheets:99", true).await.unwrap(), None);

    manager
        .set(
            "character",
            "character:sheets:99",
            json(serde_json::json!({"hp": 1})),
            Some(Duration::from_secs(60)),
            true,
        )
        .await
        .unwrap();

    let result = manager.get("character", "character:sheets:99", true).await.unwrap();
    assert_eq!(result, Some(json(serde_json::json!({"hp": 1}))));
}

#[tokio::test]
async fn keyspace_violation_is_rejected_before_any_backend_contact() {
    let (manager, transport) = common::setup_manager();

    let result = manager.get("character", "character:sessions:abc", true).await;
    assert!(matches!(result, Err(CacheError::KeyspaceForbidden { service, keyspace })
        if service == "character" && keyspace == "sessions"));
    assert_eq!(transport.call_count(), 0, "validation failure must not reach the transport");
}

#[tokio::test]
async fn empty_key_is_rejected_before_any_backend_contact() {
    let (manager, transport) = common::setup_manager();

    let result = manager.get("character", "", true).await;
    assert!(matches!(result, Err(CacheError::KeyInvalid(_))));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn set_many_then_get_many_returns_every_member() {
    let (_unused, transport) = common::setup_manager();
    let manager = manager_with_keyspace(transport, "k", Duration::from_secs(60));

    let entries = vec![
        ("a:k:1".to_string(), json(serde_json::json!(1)), None),
        ("a:k:2".to_string(), json(serde_json::json!(2)), None),
        ("a:k:3".to_string(), json(serde_json::json!(3)), None),
    ];
    let written = manager.set_many("a", &entries, true).await.unwrap();
    assert_eq!(written, 3);

    let keys: Vec<String> = entries.iter().map(|(k, _, _)| k.clone()).collect();
    let result = manager.get_many("a", &keys, true).await.unwrap();
    for (key, value, _) in &entries {
        assert_eq!(result.get(key), Some(value));
    }
}

#[tokio::test]
async fn breaker_opens_after_threshold_failures_and_rejects_without_a_backend_call() {
    let (manager, transport) = common::setup_manager_with_fast_breaker();
    transport.set_healthy(false);

    let first = manager.get("auth", "auth:sessions:1", true).await;
    assert!(matches!(first, Err(CacheError::ConnectionFail { .. })));

    let second = manager.get("auth", "auth:sessions:1", true).await;
    assert!(matches!(second, Err(CacheError::BreakerOpen { .. })));
}

#[tokio::test]
async fn breaker_closes_again_after_timeout_and_successful_probes() {
    let (manager, transport) = common::setup_manager_with_fast_breaker();
    transport.set_healthy(false);
    let _ = manager.get("auth", "auth:sessions:1", true).await;
    let _ = manager.get("auth", "auth:sessions:1", true).await;

    transport.set_healthy(true);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = manager.get("auth", "auth:sessions:1", true).await;
    assert!(result.is_ok());
}

fn manager_with_keyspace(
    transport: std::sync::Arc<common::InMemoryTransport>,
    keyspace: &str,
    near_cache_ttl: Duration,
) -> cache_service::manager::CacheManager {
    let mut config = cache_service::config::CacheServiceConfig::default();
    config
        .acl
        .allowed_keyspaces
        .insert("a".to_string(), [keyspace].into_iter().map(String::from).collect());
    let near_cache = std::sync::Arc::new(cache_service::near_cache::NearCache::new(
        cache_service::near_cache::NearCacheConfig {
            max_capacity: 100,
            default_ttl: near_cache_ttl,
        },
    ));
    let breaker = std::sync::Arc::new(cache_service::breaker::CircuitBreaker::new(
        cache_service::breaker::BreakerConfig::default(),
    ));
    cache_service::manager::CacheManager::new(near_cache, transport, breaker, config)
}

#[tokio::test]
async fn batch_get_returns_only_present_members() {
    let (_unused, transport) = common::setup_manager();
    let policy = cache_service::value::CompressionPolicy::disabled();
    transport
        .set("a:k:1", &cache_service::value::encode(&json(serde_json::json!(1)), policy).unwrap(), None)
        .await
        .unwrap();
    transport
        .set("a:k:2", &cache_service::value::encode(&json(serde_json::json!(2)), policy).unwrap(), None)
        .await
        .unwrap();

    let manager = manager_with_keyspace(transport, "k", Duration::from_secs(60));

    let keys = vec!["a:k:1".to_string(), "a:k:2".to_string(), "a:k:3".to_string()];
    let result = manager.get_many("a", &keys, true).await.unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.get("a:k:1"), Some(&json(serde_json::json!(1))));
    assert_eq!(result.get("a:k:2"), Some(&json(serde_json::json!(2))));
    assert!(!result.contains_key("a:k:3"));
}

#[tokio::test]
async fn near_cache_serves_stale_value_until_ttl_expiry_even_after_external_write() {
    let (_unused, transport) = common::setup_manager();
    let policy = cache_service::value::CompressionPolicy::disabled();

    transport
        .set("a:k:5", &cache_service::value::encode(&json(serde_json::json!("old")), policy).unwrap(), None)
        .await
        .unwrap();

    let manager = manager_with_keyspace(transport.clone(), "k", Duration::from_secs(60));

    let first = manager.get("a", "a:k:5", true).await.unwrap();
    assert_eq!(first, Some(json(serde_json::json!("old"))));

    transport
        .set("a:k:5", &cache_service::value::encode(&json(serde_json::json!("new")), policy).unwrap(), None)
        .await
        .unwrap();

    let still_cached = manager.get("a", "a:k:5", true).await.unwrap();
    assert_eq!(still_cached, Some(json(serde_json::json!("old"))));
}

#[tokio::test]
async fn get_with_use_local_false_always_reads_through_to_the_backend() {
    let (_unused, transport) = common::setup_manager();
    let policy = cache_service::value::CompressionPolicy::disabled();

    transport
        .set("a:k:6", &cache_service::value::encode(&json(serde_json::json!("old")), policy).unwrap(), None)
        .await
        .unwrap();

    let manager = manager_with_keyspace(transport.clone(), "k", Duration::from_secs(60));

    let first = manager.get("a", "a:k:6", true).await.unwrap();
    assert_eq!(first, Some(json(serde_json::json!("old"))));

    transport
        .set("a:k:6", &cache_service::value::encode(&json(serde_json::json!("new")), policy).unwrap(), None)
        .await
        .unwrap();

    // Near-cache still has the stale value...
    let cached = manager.get("a", "a:k:6", true).await.unwrap();
    assert_eq!(cached, Some(json(serde_json::json!("old"))));

    // ...but use_local=false bypasses it and reaches the backend directly.
    let bypassed = manager.get("a", "a:k:6", false).await.unwrap();
    assert_eq!(bypassed, Some(json(serde_json::json!("new"))));
}

#[tokio::test]
async fn flush_without_pattern_clears_only_the_callers_own_keyspace() {
    let (_unused, transport) = common::setup_manager();
    let manager = manager_with_keyspace(transport.clone(), "k", Duration::from_secs(60));

    manager
        .set("a", "a:k:1", json(serde_json::json!(1)), None, true)
        .await
        .unwrap();

    let encoded = cache_service::value::encode(
        &json(serde_json::json!("untouched")),
        cache_service::value::CompressionPolicy::disabled(),
    )
    .unwrap();
    transport.set("other:k:1", &encoded, None).await.unwrap();

    manager.flush("a", None, false).await.unwrap();

    assert_eq!(manager.get("a", "a:k:1", false).await.unwrap(), None);
    assert!(transport.get("other:k:1").await.unwrap().is_some());
}
