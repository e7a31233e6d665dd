//! Shared wiring for the gateway tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use mumu_iam::IamResult;
use mumu_iam::cache::{CacheBackend, CacheStore, EntityCache, Invalidator};
use mumu_iam::config::{ArchiveConfig, CacheConfig, InvalidationConfig};
use mumu_iam::gateway::{
    AccessTokenClaims, PermissionGateway, RoleGateway, RoleUsageGuard, TokenGateway,
    TokenValidator,
};
use mumu_iam::storage::{AuthorityStorage, AuthorityTransaction};
use mumu_iam::types::{
    Authority, AuthorityFilter, AuthorityPath, Page, PageRequest, Permission, Slice,
};
use mumu_iam_memory::MemoryIamStorage;
use time::OffsetDateTime;
use tokio::sync::Notify;

pub const SECRET: &[u8] = b"gateway-test-secret-gateway-test-secret";

pub struct Harness {
    pub storage: MemoryIamStorage,
    pub cache: Arc<dyn CacheStore>,
    pub invalidator: Arc<Invalidator>,
    pub roles: RoleGateway,
    pub permissions: PermissionGateway,
    pub tokens: TokenGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(CacheBackend::new_local()), ArchiveConfig::default())
    }

    pub fn with_store(cache: Arc<dyn CacheStore>) -> Self {
        Self::build(cache, ArchiveConfig::default())
    }

    pub fn with_archive(archive: ArchiveConfig) -> Self {
        Self::build(Arc::new(CacheBackend::new_local()), archive)
    }

    fn build(cache: Arc<dyn CacheStore>, archive: ArchiveConfig) -> Self {
        let storage = MemoryIamStorage::new();
        let config = CacheConfig {
            invalidation: fast_retries(),
            ..CacheConfig::default()
        };
        let invalidator = Invalidator::spawn(Arc::clone(&cache), config.invalidation.clone());

        let roles = RoleGateway::new(
            storage.roles(),
            EntityCache::new(Arc::clone(&cache), &config.key_prefix, config.ttl.clone()),
            Arc::clone(&invalidator),
        )
        .with_archive_config(archive.clone());

        let permissions = PermissionGateway::new(
            storage.permissions(),
            EntityCache::new(Arc::clone(&cache), &config.key_prefix, config.ttl.clone()),
            Arc::clone(&invalidator),
        )
        .with_usage_guard(Arc::new(RoleUsageGuard::new(storage.roles())))
        .with_archive_config(archive);

        let tokens = TokenGateway::new(
            storage.tokens(),
            Arc::clone(&cache),
            Arc::clone(&invalidator),
            TokenValidator::hs256(SECRET),
            &config,
        );

        Self {
            storage,
            cache,
            invalidator,
            roles,
            permissions,
            tokens,
        }
    }
}

impl Harness {
    /// A permission gateway over `storage`, sharing this harness's cache.
    pub fn permission_gateway(
        &self,
        storage: Arc<dyn AuthorityStorage<Permission>>,
    ) -> PermissionGateway {
        let config = CacheConfig::default();
        PermissionGateway::new(
            storage,
            EntityCache::new(Arc::clone(&self.cache), &config.key_prefix, config.ttl.clone()),
            Arc::clone(&self.invalidator),
        )
    }
}

pub fn fast_retries() -> InvalidationConfig {
    InvalidationConfig {
        max_attempts: 5,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        queue_capacity: 16,
    }
}

/// Signs an access token for an authorization record.
pub fn access_jwt(authorization_id: &str, lifetime_secs: i64) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = AccessTokenClaims {
        sub: "alice".to_string(),
        exp: now + lifetime_secs,
        iat: Some(now),
        iss: None,
        authorization_id: authorization_id.to_string(),
        grant_type: Some("authorization_code".to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET),
    )
    .expect("encode access token")
}

/// Storage wrapper that can hold one committed read open and slow down
/// closure walks inside transactions.
pub struct SteppedStorage<E: Authority> {
    inner: Arc<dyn AuthorityStorage<E>>,
    hold_next_read: AtomicBool,
    read_done: Notify,
    release: Notify,
    walk_delay: Option<Duration>,
}

impl<E: Authority> SteppedStorage<E> {
    pub fn new(inner: Arc<dyn AuthorityStorage<E>>) -> Self {
        Self {
            inner,
            hold_next_read: AtomicBool::new(false),
            read_done: Notify::new(),
            release: Notify::new(),
            walk_delay: None,
        }
    }

    /// Every `direct_paths_from` inside a transaction sleeps this long first.
    pub fn with_walk_delay(mut self, delay: Duration) -> Self {
        self.walk_delay = Some(delay);
        self
    }

    /// The next `find_by_id` reads, then waits for [`Self::release`].
    pub fn hold_next_read(&self) {
        self.hold_next_read.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held read has fetched its row.
    pub async fn read_done(&self) {
        self.read_done.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl<E: Authority> AuthorityStorage<E> for SteppedStorage<E> {
    async fn begin(&self) -> IamResult<Box<dyn AuthorityTransaction<E>>> {
        let inner = self.inner.begin().await?;
        Ok(match self.walk_delay {
            Some(delay) => Box::new(SlowWalkTransaction { inner, delay }),
            None => inner,
        })
    }

    async fn find_by_id(&self, id: i64) -> IamResult<Option<E>> {
        let found = self.inner.find_by_id(id).await?;
        if self.hold_next_read.swap(false, Ordering::SeqCst) {
            self.read_done.notify_one();
            self.release.notified().await;
        }
        Ok(found)
    }

    async fn find_by_code(&self, code: &str) -> IamResult<Option<E>> {
        self.inner.find_by_code(code).await
    }

    async fn find_page(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Page<E>> {
        self.inner.find_page(filter, archived, page).await
    }

    async fn find_slice(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Slice<E>> {
        self.inner.find_slice(filter, archived, page).await
    }

    async fn find_roots(&self, page: PageRequest) -> IamResult<Page<E>> {
        self.inner.find_roots(page).await
    }

    async fn find_direct(&self, ancestor_id: i64, page: PageRequest) -> IamResult<Page<E>> {
        self.inner.find_direct(ancestor_id, page).await
    }

    async fn find_archived_before(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> IamResult<Vec<E>> {
        self.inner.find_archived_before(cutoff, limit).await
    }

    async fn find_referencing(&self, referenced_id: i64) -> IamResult<Vec<E>> {
        self.inner.find_referencing(referenced_id).await
    }
}

struct SlowWalkTransaction<E: Authority> {
    inner: Box<dyn AuthorityTransaction<E>>,
    delay: Duration,
}

#[async_trait]
impl<E: Authority> AuthorityTransaction<E> for SlowWalkTransaction<E> {
    async fn commit(self: Box<Self>) -> IamResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> IamResult<()> {
        self.inner.rollback().await
    }

    async fn lock_hierarchy(&mut self) -> IamResult<()> {
        self.inner.lock_hierarchy().await
    }

    async fn find_by_id(&mut self, id: i64) -> IamResult<Option<E>> {
        self.inner.find_by_id(id).await
    }

    async fn find_active_by_code(&mut self, code: &str) -> IamResult<Option<E>> {
        self.inner.find_active_by_code(code).await
    }

    async fn next_id(&mut self) -> IamResult<i64> {
        self.inner.next_id().await
    }

    async fn insert(&mut self, entity: &E) -> IamResult<()> {
        self.inner.insert(entity).await
    }

    async fn update(&mut self, entity: &E) -> IamResult<()> {
        self.inner.update(entity).await
    }

    async fn delete(&mut self, id: i64) -> IamResult<bool> {
        self.inner.delete(id).await
    }

    async fn paths_to(&mut self, descendant_id: i64) -> IamResult<Vec<AuthorityPath>> {
        self.inner.paths_to(descendant_id).await
    }

    async fn paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>> {
        self.inner.paths_from(ancestor_ids).await
    }

    async fn direct_paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>> {
        tokio::time::sleep(self.delay).await;
        self.inner.direct_paths_from(ancestor_ids).await
    }

    async fn merge_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()> {
        self.inner.merge_paths(paths).await
    }

    async fn save_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()> {
        self.inner.save_paths(paths).await
    }

    async fn delete_paths(&mut self, pairs: &[(i64, i64)]) -> IamResult<()> {
        self.inner.delete_paths(pairs).await
    }
}
