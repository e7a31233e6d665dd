//! Cache-aside layer.
//!
//! The cache is a read-through, write-invalidate projection of the store of
//! record. It never originates data and never fails a request: read errors
//! are misses, and failed invalidations are retried in the background.
//!
//! ## Modules
//!
//! - [`backend`] - local (DashMap) and Redis stores
//! - [`entity`] - typed by-id / by-code entity cache
//! - [`invalidation`] - post-commit invalidation with retry queue

pub mod backend;
pub mod entity;
pub mod invalidation;
pub mod level;

pub use backend::{
    CacheBackend, CacheCounters, CacheStats, CacheStore, CachedEntry, create_cache_backend,
};
pub use entity::EntityCache;
pub use invalidation::{InvalidationStats, Invalidator};
pub use level::CacheLevel;
