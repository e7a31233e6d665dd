//! Post-commit cache invalidation with background retry.
//!
//! Every key is attempted once inline. Keys whose invalidation fails are
//! handed to a bounded retry queue drained by a background worker, which
//! retries with exponential backoff. The caller is never failed by the
//! cache: the write has already committed.
//!
//! ## Fill Generations
//!
//! Every invalidation bumps a generation counter before touching the store.
//! A reader that fills the cache after a store read captures the generation
//! before the read and checks it again around the fill; a moved generation
//! means a write may have committed in between, so the fill is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cache::CacheStore;
use crate::config::InvalidationConfig;

/// Deletes cache keys after a committed write.
pub struct Invalidator {
    store: Arc<dyn CacheStore>,
    policy: InvalidationConfig,
    queue: Option<mpsc::Sender<String>>,
    counters: Arc<InvalidationCounters>,
    generation: AtomicU64,
}

impl Invalidator {
    /// Creates an invalidator with a background retry worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn CacheStore>, policy: InvalidationConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(policy.queue_capacity.max(1));
        let counters = Arc::new(InvalidationCounters::default());

        tokio::spawn(run_retry_worker(
            Arc::clone(&store),
            rx,
            policy.clone(),
            Arc::clone(&counters),
        ));

        Arc::new(Self {
            store,
            policy,
            queue: Some(tx),
            counters,
            generation: AtomicU64::new(0),
        })
    }

    /// Creates an invalidator that retries failed keys inline, before
    /// returning to the caller.
    pub fn inline(store: Arc<dyn CacheStore>, policy: InvalidationConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            policy,
            queue: None,
            counters: Arc::new(InvalidationCounters::default()),
            generation: AtomicU64::new(0),
        })
    }

    /// Invalidates every key. Never fails.
    pub async fn invalidate(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        for key in keys {
            match self.store.invalidate(key).await {
                Ok(()) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cache invalidation failed, scheduling retry");
                    self.schedule_retry(key.clone()).await;
                }
            }
        }
    }

    /// Current fill generation. Capture it before reading the store of record.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns `true` if no invalidation started since `generation` was
    /// captured.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Invalidation statistics for monitoring.
    pub fn stats(&self) -> InvalidationStats {
        self.counters.snapshot()
    }

    /// Waits until no retries are pending or `timeout` elapses.
    ///
    /// Returns `true` if the queue drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.counters.pending.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn schedule_retry(&self, key: String) {
        let Some(queue) = &self.queue else {
            retry_with_backoff(self.store.as_ref(), &key, &self.policy, &self.counters).await;
            return;
        };

        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match queue.try_send(key) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(key) | mpsc::error::TrySendError::Closed(key)) => {
                // Queue unavailable: retry on a detached task instead.
                tracing::warn!(key = %key, "invalidation queue unavailable, retrying on a detached task");
                let store = Arc::clone(&self.store);
                let policy = self.policy.clone();
                let counters = Arc::clone(&self.counters);
                tokio::spawn(async move {
                    retry_with_backoff(store.as_ref(), &key, &policy, &counters).await;
                    counters.pending.fetch_sub(1, Ordering::AcqRel);
                });
            }
        }
    }
}

async fn run_retry_worker(
    store: Arc<dyn CacheStore>,
    mut rx: mpsc::Receiver<String>,
    policy: InvalidationConfig,
    counters: Arc<InvalidationCounters>,
) {
    while let Some(key) = rx.recv().await {
        let store = Arc::clone(&store);
        let policy = policy.clone();
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            retry_with_backoff(store.as_ref(), &key, &policy, &counters).await;
            counters.pending.fetch_sub(1, Ordering::AcqRel);
        });
    }
    tracing::debug!("invalidation retry worker stopped");
}

/// Retries one key until it succeeds or the attempts run out.
async fn retry_with_backoff(
    store: &dyn CacheStore,
    key: &str,
    policy: &InvalidationConfig,
    counters: &InvalidationCounters,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.backoff(attempt)).await;
        match store.invalidate(key).await {
            Ok(()) => {
                counters.recovered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(key = %key, attempt, "cache invalidation succeeded after retry");
                return true;
            }
            Err(e) => {
                tracing::warn!(key = %key, attempt, error = %e, "cache invalidation retry failed");
            }
        }
    }

    counters.abandoned.fetch_add(1, Ordering::Relaxed);
    tracing::error!(
        key = %key,
        attempts = policy.max_attempts,
        "cache invalidation abandoned; entry stays until its TTL expires"
    );
    false
}

#[derive(Debug, Default)]
struct InvalidationCounters {
    succeeded: AtomicU64,
    recovered: AtomicU64,
    abandoned: AtomicU64,
    pending: AtomicU64,
}

impl InvalidationCounters {
    fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Acquire),
        }
    }
}

/// Invalidation statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Keys invalidated on the first attempt.
    pub succeeded: u64,
    /// Keys invalidated by a retry.
    pub recovered: u64,
    /// Keys given up on after the last retry.
    pub abandoned: u64,
    /// Keys currently waiting for a retry.
    pub pending: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;
    use crate::error::{CacheError, CacheResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` invalidations, then delegates.
    struct FlakyStore {
        inner: CacheBackend,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: CacheBackend::new_local(),
                failures: AtomicU32::new(failures),
            }
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
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(CacheError::Unavailable("flaky".into()));
            }
            self.inner.invalidate(key).await
        }
        fn mode(&self) -> &'static str {
            "flaky"
        }
    }

    fn policy(max_attempts: u32) -> InvalidationConfig {
        InvalidationConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            queue_capacity: 16,
        }
    }

    #[tokio::test]
    async fn test_invalidate_success() {
        let store = Arc::new(CacheBackend::new_local());
        store
            .put("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let invalidator = Invalidator::spawn(store.clone(), policy(3));
        invalidator.invalidate(&["k".to_string()]).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(invalidator.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_failed_invalidation_is_retried_in_background() {
        let store = Arc::new(FlakyStore::new(2));
        store
            .put("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let invalidator = Invalidator::spawn(store.clone(), policy(5));
        invalidator.invalidate(&["k".to_string()]).await;

        assert!(invalidator.wait_idle(Duration::from_secs(2)).await);
        assert!(store.get("k").await.unwrap().is_none());

        let stats = invalidator.stats();
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.abandoned, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_invalidate_moves_generation() {
        let invalidator = Invalidator::inline(Arc::new(CacheBackend::new_local()), policy(1));
        let before = invalidator.generation();

        invalidator.invalidate(&[]).await;
        assert!(invalidator.is_current(before));

        invalidator.invalidate(&["k".to_string()]).await;
        assert!(!invalidator.is_current(before));
        assert!(invalidator.is_current(invalidator.generation()));
    }

    #[tokio::test]
    async fn test_inline_retry_gives_up_after_max_attempts() {
        let store = Arc::new(FlakyStore::new(10));
        let invalidator = Invalidator::inline(store, policy(3));

        invalidator.invalidate(&["k".to_string()]).await;

        let stats = invalidator.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.recovered, 0);
        assert_eq!(stats.pending, 0);
    }
}
