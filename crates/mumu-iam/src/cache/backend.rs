//! Cache store implementations: local (DashMap) and shared (Redis).
//!
//! ## Cache Modes
//!
//! - **Local**: single-instance mode using only DashMap
//! - **Redis**: multi-instance mode; every instance reads and writes the same
//!   Redis keys, so an invalidation on one instance is seen by all of them
//!
//! Unlike a read-optimized L1+L2 layout, Redis mode keeps no per-instance
//! copy: a local copy could outlive an invalidation issued by another
//! instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};

/// Byte-oriented key/value store with per-record TTL.
///
/// Errors are reported to the caller, which decides whether to treat them as
/// a miss (reads) or retry them (invalidations).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value. Expired records are misses.
    async fn get(&self, key: &str) -> CacheResult<Option<Arc<Vec<u8>>>>;

    /// Store a value, overwriting unconditionally.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Remove a value. Removing an absent key succeeds.
    async fn invalidate(&self, key: &str) -> CacheResult<()>;

    /// Short name of the store, for logs and stats.
    fn mode(&self) -> &'static str;

    /// Number of locally held entries, when known.
    fn entries(&self) -> Option<usize> {
        None
    }
}

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` to allow cheap cloning on cache hits.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    /// Create a new cached entry.
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Cache backend selected from configuration.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local DashMap only.
    Local(Arc<DashMap<String, CachedEntry>>),

    /// Multi-instance: shared Redis.
    Redis(Pool),
}

impl CacheBackend {
    /// Create a new local-only cache backend.
    pub fn new_local() -> Self {
        CacheBackend::Local(Arc::new(DashMap::new()))
    }

    /// Create a new Redis-backed cache backend.
    pub fn new_redis(redis_pool: Pool) -> Self {
        CacheBackend::Redis(redis_pool)
    }

    /// Remove expired local entries. Returns the number removed.
    ///
    /// Redis expires keys natively, so this is a no-op there.
    pub fn cleanup_expired(&self) -> usize {
        match self {
            CacheBackend::Local(map) => {
                let before = map.len();
                map.retain(|_, entry| !entry.is_expired());
                before.saturating_sub(map.len())
            }
            CacheBackend::Redis(_) => 0,
        }
    }

    /// Check if Redis is available (for health checks).
    pub async fn is_redis_available(&self) -> bool {
        match self {
            CacheBackend::Local(_) => false,
            CacheBackend::Redis(redis) => redis.get().await.is_ok(),
        }
    }
}

#[async_trait]
impl CacheStore for CacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Arc<Vec<u8>>>> {
        match self {
            CacheBackend::Local(map) => {
                if let Some(entry) = map.get(key) {
                    if !entry.is_expired() {
                        return Ok(Some(Arc::clone(&entry.data)));
                    }
                    // Remove expired entry
                    drop(entry);
                    map.remove(key);
                }
                Ok(None)
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis
                    .get()
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
                let data = conn
                    .get::<_, Option<Vec<u8>>>(key)
                    .await
                    .map_err(|e| CacheError::Command(e.to_string()))?;
                Ok(data.map(Arc::new))
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        match self {
            CacheBackend::Local(map) => {
                map.insert(key.to_string(), CachedEntry::new(value, ttl));
                Ok(())
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis
                    .get()
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
                // Redis rejects a zero expiry; round up to whole seconds.
                let ttl_secs = ttl.as_millis().div_ceil(1000).max(1) as u64;
                conn.set_ex::<_, _, ()>(key, value, ttl_secs)
                    .await
                    .map_err(|e| CacheError::Command(e.to_string()))?;
                tracing::debug!(key = %key, ttl_secs = %ttl_secs, "cache set (redis)");
                Ok(())
            }
        }
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        match self {
            CacheBackend::Local(map) => {
                map.remove(key);
                tracing::debug!(key = %key, "cache invalidated (local)");
                Ok(())
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis
                    .get()
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
                conn.del::<_, ()>(key)
                    .await
                    .map_err(|e| CacheError::Command(e.to_string()))?;
                tracing::debug!(key = %key, "cache invalidated (redis)");
                Ok(())
            }
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Local(_) => "local",
            CacheBackend::Redis(_) => "redis",
        }
    }

    fn entries(&self) -> Option<usize> {
        match self {
            CacheBackend::Local(map) => Some(map.len()),
            CacheBackend::Redis(_) => None,
        }
    }
}

/// Creates the cache backend described by `config`.
///
/// Falls back to the local cache when Redis is disabled, the pool cannot be
/// created, or the first connection fails.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheBackend {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis successfully");
            CacheBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheBackend::new_local()
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Lock-free hit/miss counters shared by the typed caches.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheCounters {
    /// Records a hit.
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a miss.
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a store error (also counted as a miss on reads).
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot.
    #[must_use]
    pub fn snapshot(&self, store: &dyn CacheStore) -> CacheStats {
        CacheStats {
            mode: store.mode(),
            entries: store.entries(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Store mode ("local" or "redis").
    pub mode: &'static str,
    /// Number of locally held entries, when known.
    pub entries: Option<usize>,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of store errors.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_put_get_invalidate() {
        let cache = CacheBackend::new_local();

        cache
            .put("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&b"value".to_vec()));
        assert_eq!(cache.entries(), Some(1));

        cache.invalidate("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_absent_key_is_noop() {
        let cache = CacheBackend::new_local();
        assert!(cache.invalidate("missing").await.is_ok());
        assert_eq!(cache.entries(), Some(0));
    }

    #[tokio::test]
    async fn test_local_expiry() {
        let cache = CacheBackend::new_local();
        cache
            .put("short", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        cache
            .put("long", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.get("long").await.unwrap().is_some());
        cache
            .put("short2", b"v".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.entries(), Some(1));
    }

    #[tokio::test]
    async fn test_disabled_redis_falls_back_to_local() {
        let backend = create_cache_backend(&RedisConfig::default()).await;
        assert_eq!(backend.mode(), "local");
        assert!(!backend.is_redis_available().await);
    }

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::default();
        let store = CacheBackend::new_local();
        assert_eq!(counters.snapshot(&store).hit_rate(), 0.0);

        counters.hit();
        counters.hit();
        counters.hit();
        counters.miss();
        let stats = counters.snapshot(&store);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
    }
}
