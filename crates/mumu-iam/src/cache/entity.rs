//! Typed read-through cache for authority entities.
//!
//! ## Cache Keys
//!
//! - `{prefix}:{kind}:id:{id}`
//! - `{prefix}:{kind}:code:{code}`
//!
//! Both keys hold the full serialized entity. Store errors are logged and
//! treated as misses: the cache never fails a request.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::cache::{CacheCounters, CacheLevel, CacheStats, CacheStore};
use crate::config::CacheTtlConfig;
use crate::types::Authority;

/// Cache-aside projection of one authority kind.
pub struct EntityCache<E> {
    store: Arc<dyn CacheStore>,
    prefix: String,
    ttl: CacheTtlConfig,
    counters: Arc<CacheCounters>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityCache<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix.clone(),
            ttl: self.ttl.clone(),
            counters: Arc::clone(&self.counters),
            _entity: PhantomData,
        }
    }
}

impl<E: Authority> EntityCache<E> {
    /// Creates a typed cache over a shared store.
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>, ttl: CacheTtlConfig) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
            counters: Arc::new(CacheCounters::default()),
            _entity: PhantomData,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Key of the id entry.
    pub fn id_key(&self, id: i64) -> String {
        format!("{}:{}:id:{}", self.prefix, E::KIND, id)
    }

    /// Key of the code entry.
    pub fn code_key(&self, code: &str) -> String {
        format!("{}:{}:code:{}", self.prefix, E::KIND, code)
    }

    /// Both keys of an entity.
    pub fn keys_for(&self, entity: &E) -> [String; 2] {
        [self.id_key(entity.id()), self.code_key(entity.code())]
    }

    /// Cached entity by id.
    pub async fn get_by_id(&self, id: i64) -> Option<E> {
        self.get(&self.id_key(id)).await
    }

    /// Cached entity by code.
    pub async fn get_by_code(&self, code: &str) -> Option<E> {
        self.get(&self.code_key(code)).await
    }

    /// Stores the entity under both keys with the tier's TTL.
    pub async fn put(&self, entity: &E, level: CacheLevel) {
        let payload = match serde_json::to_vec(entity) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.error();
                tracing::warn!(kind = %E::KIND, id = entity.id(), error = %e, "cache encode failed");
                return;
            }
        };
        let ttl = self.ttl.for_level(level);

        for key in self.keys_for(entity) {
            if let Err(e) = self.store.put(&key, payload.clone(), ttl).await {
                self.counters.error();
                tracing::warn!(key = %key, error = %e, "cache put failed");
            }
        }
    }

    /// Removes the id entry directly. Returns `false` if the store failed.
    pub async fn invalidate_by_id(&self, id: i64) -> bool {
        self.invalidate(&self.id_key(id)).await
    }

    /// Removes the code entry directly. Returns `false` if the store failed.
    pub async fn invalidate_by_code(&self, code: &str) -> bool {
        self.invalidate(&self.code_key(code)).await
    }

    /// Cache statistics for monitoring.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.store.as_ref())
    }

    async fn get(&self, key: &str) -> Option<E> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.counters.miss();
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                self.counters.error();
                self.counters.miss();
                tracing::warn!(key = %key, error = %e, "cache unavailable, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<E>(&bytes) {
            Ok(entity) => {
                self.counters.hit();
                tracing::debug!(key = %key, "cache hit");
                Some(entity)
            }
            Err(e) => {
                self.counters.error();
                self.counters.miss();
                tracing::warn!(key = %key, error = %e, "cache decode failed, treating as miss");
                None
            }
        }
    }

    async fn invalidate(&self, key: &str) -> bool {
        match self.store.invalidate(key).await {
            Ok(()) => true,
            Err(e) => {
                self.counters.error();
                tracing::warn!(key = %key, error = %e, "cache invalidate failed");
                false
            }
        }
    }
}
