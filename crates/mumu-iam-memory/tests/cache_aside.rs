//! Cache-aside reads and post-commit invalidation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, SteppedStorage};
use mumu_iam::cache::{CacheBackend, CacheStore};
use mumu_iam::error::{CacheError, CacheResult};
use mumu_iam::types::{Permission, PermissionPatch, Role, RolePatch};

/// Fails the first `failures` invalidations, then delegates.
struct FlakyStore {
    inner: CacheBackend,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: CacheBackend::new_local(),
            failures: AtomicU32::new(0),
        }
    }

    fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Arc<Vec<u8>>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.inner.put(key, value, ttl).await
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CacheError::Unavailable("flaky".to_string()));
        }
        self.inner.invalidate(key).await
    }

    fn mode(&self) -> &'static str {
        "flaky"
    }
}

/// Always fails.
struct DownStore;

#[async_trait]
impl CacheStore for DownStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Arc<Vec<u8>>>> {
        Err(CacheError::Unavailable("down".to_string()))
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("down".to_string()))
    }

    async fn invalidate(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("down".to_string()))
    }

    fn mode(&self) -> &'static str {
        "down"
    }
}

#[tokio::test]
async fn test_read_populates_both_keys() {
    let h = Harness::new();
    let id = h.roles.add(Role::new("ADMIN", "Administrator")).await.unwrap();

    let cache = h.roles.cache();
    assert!(cache.get_by_id(id).await.is_none());

    h.roles.find_by_id(id).await.unwrap();
    assert_eq!(cache.get_by_id(id).await.map(|r| r.code), Some("ADMIN".to_string()));
    assert_eq!(cache.get_by_code("ADMIN").await.map(|r| r.id), Some(id));

    let stats = cache.stats();
    assert!(stats.hits >= 2);
    assert!(stats.misses >= 2);
}

#[tokio::test]
async fn test_write_invalidates_cached_entry() {
    let h = Harness::new();
    let id = h.roles.add(Role::new("ADMIN", "Administrator")).await.unwrap();
    h.roles.find_by_code("ADMIN").await.unwrap();

    let patch = RolePatch {
        name: Some("Super user".to_string()),
        ..RolePatch::default()
    };
    h.roles.update_by_id(id, patch).await.unwrap();

    assert!(h.roles.cache().get_by_code("ADMIN").await.is_none());
    assert_eq!(h.roles.find_by_code("ADMIN").await.unwrap().name, "Super user");
}

#[tokio::test]
async fn test_read_overlapping_write_does_not_cache_stale_row() {
    let h = Harness::new();
    let storage = Arc::new(SteppedStorage::new(h.storage.permissions()));
    let gateway = Arc::new(h.permission_gateway(storage.clone()));
    let id = gateway.add(Permission::new("READ", "Old name")).await.unwrap();

    // The reader fetches the old row, then stalls before filling the cache.
    storage.hold_next_read();
    let reader = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.find_by_id(id).await }
    });
    storage.read_done().await;

    let patch = PermissionPatch {
        name: Some("New name".to_string()),
        ..PermissionPatch::default()
    };
    gateway.update_by_id(id, patch).await.unwrap();

    storage.release();
    assert_eq!(reader.await.unwrap().unwrap().name, "Old name");

    assert!(gateway.cache().get_by_id(id).await.is_none());
    assert_eq!(gateway.find_by_id(id).await.unwrap().name, "New name");
    assert_eq!(gateway.find_by_code("READ").await.unwrap().name, "New name");
}

#[tokio::test]
async fn test_failed_invalidation_is_retried() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::with_store(store.clone());
    let id = h.permissions.add(Permission::new("READ", "Read")).await.unwrap();
    h.permissions.find_by_id(id).await.unwrap();

    store.fail_next(2);
    h.permissions.archive_by_id(id).await.unwrap();

    assert!(h.invalidator.wait_idle(Duration::from_secs(2)).await);
    let stats = h.invalidator.stats();
    assert_eq!(stats.recovered, 2);
    assert_eq!(stats.abandoned, 0);

    assert!(h.permissions.cache().get_by_id(id).await.is_none());
    assert!(h.permissions.find_by_id(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    let h = Harness::with_store(Arc::new(DownStore));

    let id = h.roles.add(Role::new("ADMIN", "Administrator")).await.unwrap();
    assert_eq!(h.roles.find_by_id(id).await.unwrap().code, "ADMIN");
    assert_eq!(h.roles.find_by_code("ADMIN").await.unwrap().id, id);
    assert!(h.roles.cache().stats().errors > 0);
}
