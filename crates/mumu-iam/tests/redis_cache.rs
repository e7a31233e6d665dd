//! Cache backends against a real Redis.
//!
//! The Redis tests share one container and are ignored unless a container
//! runtime is available.

use std::sync::Arc;
use std::time::Duration;

use mumu_iam::cache::{CacheBackend, CacheLevel, CacheStore, EntityCache, create_cache_backend};
use mumu_iam::config::{CacheTtlConfig, RedisConfig};
use mumu_iam::types::Permission;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{host_port}"))
        })
        .await;
    url.clone()
}

async fn redis_backend() -> CacheBackend {
    let config = RedisConfig {
        enabled: true,
        url: redis_url().await,
        ..RedisConfig::default()
    };
    create_cache_backend(&config).await
}

#[tokio::test]
async fn test_unreachable_redis_falls_back_to_local() {
    let config = RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".to_string(),
        timeout_ms: 200,
        ..RedisConfig::default()
    };
    let backend = create_cache_backend(&config).await;
    assert_eq!(backend.mode(), "local");
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_put_get_invalidate() {
    let backend = redis_backend().await;
    assert_eq!(backend.mode(), "redis");
    assert!(backend.is_redis_available().await);

    backend
        .put("mumu-test:k1", b"v1".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();
    let value = backend.get("mumu-test:k1").await.unwrap();
    assert_eq!(value.as_deref(), Some(&b"v1".to_vec()));

    backend.invalidate("mumu-test:k1").await.unwrap();
    assert!(backend.get("mumu-test:k1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_redis_ttl_expires() {
    let backend = redis_backend().await;

    backend
        .put("mumu-test:short", b"v".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(backend.get("mumu-test:short").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(backend.get("mumu-test:short").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn test_entity_cache_shared_between_instances() {
    let first: Arc<dyn CacheStore> = Arc::new(redis_backend().await);
    let second: Arc<dyn CacheStore> = Arc::new(redis_backend().await);
    let node_a = EntityCache::<Permission>::new(first, "mumu-shared", CacheTtlConfig::default());
    let node_b = EntityCache::<Permission>::new(second, "mumu-shared", CacheTtlConfig::default());

    let permission = Permission::new("DOCS_READ", "Read documents").with_id(7);
    node_a.put(&permission, CacheLevel::Medium).await;

    let seen = node_b.get_by_code("DOCS_READ").await;
    assert_eq!(seen.map(|p| p.id), Some(7));

    assert!(node_b.invalidate_by_id(7).await);
    assert!(node_a.get_by_id(7).await.is_none());
}
