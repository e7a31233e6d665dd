//! Role and permission gateway.
//!
//! Every mutation runs in one [`UnitOfWork`]: entity write, closure-table
//! adjustment and the cache keys to drop are committed together, and the
//! keys are invalidated before the call returns. Reads go through the
//! entity cache first and populate it on a miss. Only active entities are
//! ever cached.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::instrument;

use crate::cache::{CacheLevel, EntityCache, Invalidator};
use crate::config::{ArchiveConfig, HierarchyConfig};
use crate::error::{IamError, IamResult};
use crate::gateway::UsageGuard;
use crate::hierarchy;
use crate::storage::AuthorityStorage;
use crate::types::{Authority, AuthorityFilter, Page, PageRequest, Permission, Role, Slice};
use crate::unit_of_work::UnitOfWork;

/// Gateway over roles.
pub type RoleGateway = AuthorityGateway<Role>;

/// Gateway over permissions.
pub type PermissionGateway = AuthorityGateway<Permission>;

/// Outcome of one archive purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Rows hard-deleted.
    pub purged: usize,
    /// Rows kept because they are still referenced.
    pub skipped: usize,
}

/// Entity store, closure table and cache-aside layer for one authority kind.
pub struct AuthorityGateway<E: Authority> {
    storage: Arc<dyn AuthorityStorage<E>>,
    cache: EntityCache<E>,
    invalidator: Arc<Invalidator>,
    usage_guard: Option<Arc<dyn UsageGuard>>,
    level: CacheLevel,
    hierarchy: HierarchyConfig,
    archive: ArchiveConfig,
}

impl<E: Authority> AuthorityGateway<E> {
    /// Creates a gateway with default hierarchy and archive settings.
    pub fn new(
        storage: Arc<dyn AuthorityStorage<E>>,
        cache: EntityCache<E>,
        invalidator: Arc<Invalidator>,
    ) -> Self {
        Self {
            storage,
            cache,
            invalidator,
            usage_guard: None,
            level: CacheLevel::default(),
            hierarchy: HierarchyConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }

    /// Refuses archive and delete while the guard reports references.
    #[must_use]
    pub fn with_usage_guard(mut self, guard: Arc<dyn UsageGuard>) -> Self {
        self.usage_guard = Some(guard);
        self
    }

    /// Sets the TTL tier used when populating the cache.
    #[must_use]
    pub fn with_cache_level(mut self, level: CacheLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the closure recomputation settings.
    #[must_use]
    pub fn with_hierarchy_config(mut self, config: HierarchyConfig) -> Self {
        self.hierarchy = config;
        self
    }

    /// Sets the archive retention settings.
    #[must_use]
    pub fn with_archive_config(mut self, config: ArchiveConfig) -> Self {
        self.archive = config;
        self
    }

    /// The entity cache, for statistics.
    pub fn cache(&self) -> &EntityCache<E> {
        &self.cache
    }

    /// The archive retention settings.
    pub fn archive_config(&self) -> &ArchiveConfig {
        &self.archive
    }

    // =========================================================================
    // Entity store
    // =========================================================================

    /// Adds an active entity and returns its id.
    ///
    /// Id 0 asks the store to allocate one.
    ///
    /// # Errors
    ///
    /// - `IamError::InvalidInput` if validation fails
    /// - `IamError::DuplicateCode` if an active entity already uses the code
    /// - `IamError::DuplicateId` if the explicit id is taken
    #[instrument(skip(self, entity), fields(kind = %E::KIND, code = %entity.code()))]
    pub async fn add(&self, mut entity: E) -> IamResult<i64> {
        entity.validate()?;
        entity.set_archived(false);
        entity.set_has_descendant(false);
        entity.audit_mut().archived_at = None;

        let mut uow = self.begin().await?;
        if uow.tx().find_active_by_code(entity.code()).await?.is_some() {
            return Err(IamError::duplicate_code(E::KIND, entity.code()));
        }

        let id = match entity.id() {
            0 => uow.tx().next_id().await?,
            id => {
                if uow.tx().find_by_id(id).await?.is_some() {
                    return Err(IamError::DuplicateId { kind: E::KIND, id });
                }
                id
            }
        };
        entity.set_id(id);

        uow.tx().insert(&entity).await?;
        uow.invalidate_on_commit(self.cache.keys_for(&entity));
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, id, code = %entity.code(), "authority added");
        Ok(id)
    }

    /// Applies a partial update to an active entity and returns the result.
    ///
    /// # Errors
    ///
    /// - `IamError::NotFound` if the id is absent or archived
    /// - `IamError::InvalidInput` if the result fails validation
    /// - `IamError::DuplicateCode` if the new code is taken
    #[instrument(skip(self, patch), fields(kind = %E::KIND))]
    pub async fn update_by_id(&self, id: i64, patch: E::Patch) -> IamResult<E> {
        let mut uow = self.begin().await?;
        let mut entity = self.find_active_in(&mut uow, id).await?;
        let old_code = entity.code().to_string();

        entity.apply(patch, OffsetDateTime::now_utc());
        entity.validate()?;

        if entity.code() != old_code
            && let Some(other) = uow.tx().find_active_by_code(entity.code()).await?
            && other.id() != id
        {
            return Err(IamError::duplicate_code(E::KIND, entity.code()));
        }

        uow.tx().update(&entity).await?;
        uow.invalidate_on_commit(self.cache.keys_for(&entity));
        uow.invalidate_on_commit([self.cache.code_key(&old_code)]);
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, id, code = %entity.code(), "authority updated");
        Ok(entity)
    }

    /// Archives an active entity. Its closure rows are kept.
    ///
    /// # Errors
    ///
    /// - `IamError::InUse` if the usage guard reports references
    /// - `IamError::NotFound` if the id is absent or already archived
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn archive_by_id(&self, id: i64) -> IamResult<()> {
        // Checked before the transaction; a role linked concurrently is not seen.
        self.ensure_unused(id).await?;

        let mut uow = self.begin().await?;
        let mut entity = self.find_active_in(&mut uow, id).await?;
        entity.archive(OffsetDateTime::now_utc());

        uow.tx().update(&entity).await?;
        uow.invalidate_on_commit(self.cache.keys_for(&entity));
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, id, code = %entity.code(), "authority archived");
        Ok(())
    }

    /// Restores an archived entity to its former place in the hierarchy.
    ///
    /// # Errors
    ///
    /// - `IamError::NotFound` if the id is absent or not archived
    /// - `IamError::DuplicateCode` if an active entity took the code meanwhile
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn recover_from_archive_by_id(&self, id: i64) -> IamResult<()> {
        let mut uow = self.begin().await?;
        let mut entity = uow
            .tx()
            .find_by_id(id)
            .await?
            .filter(|e| e.is_archived())
            .ok_or_else(|| IamError::not_found(E::KIND, id))?;

        if uow.tx().find_active_by_code(entity.code()).await?.is_some() {
            return Err(IamError::duplicate_code(E::KIND, entity.code()));
        }

        entity.recover(OffsetDateTime::now_utc());
        uow.tx().update(&entity).await?;
        uow.invalidate_on_commit(self.cache.keys_for(&entity));
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, id, code = %entity.code(), "authority recovered");
        Ok(())
    }

    /// Hard-deletes an entity, active or archived, with its closure rows.
    ///
    /// # Errors
    ///
    /// - `IamError::InUse` if the usage guard reports references
    /// - `IamError::NotFound` if the id is absent
    /// - `IamError::Timeout` if re-deriving the closure takes too long
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn delete_by_id(&self, id: i64) -> IamResult<()> {
        // Checked before the transaction; a role linked concurrently is not seen.
        self.ensure_unused(id).await?;
        self.remove(id, false).await.map(|_| ())
    }

    /// Hard-deletes the active entity with this code.
    ///
    /// # Errors
    ///
    /// Same as [`Self::delete_by_id`].
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn delete_by_code(&self, code: &str) -> IamResult<()> {
        let entity = self
            .storage
            .find_by_code(code)
            .await?
            .ok_or_else(|| IamError::not_found(E::KIND, code))?;
        self.delete_by_id(entity.id()).await
    }

    /// Active entity by id, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns `IamError::NotFound` if the id is absent or archived.
    pub async fn find_by_id(&self, id: i64) -> IamResult<E> {
        if let Some(entity) = self.cache.get_by_id(id).await {
            return Ok(entity);
        }

        let generation = self.invalidator.generation();
        let entity = self
            .storage
            .find_by_id(id)
            .await?
            .filter(|e| !e.is_archived())
            .ok_or_else(|| IamError::not_found(E::KIND, id))?;
        self.fill(&entity, generation).await;
        Ok(entity)
    }

    /// Active entity by code, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns `IamError::NotFound` if no active entity has this code.
    pub async fn find_by_code(&self, code: &str) -> IamResult<E> {
        if let Some(entity) = self.cache.get_by_code(code).await {
            return Ok(entity);
        }

        let generation = self.invalidator.generation();
        let entity = self
            .storage
            .find_by_code(code)
            .await?
            .filter(|e| !e.is_archived())
            .ok_or_else(|| IamError::not_found(E::KIND, code))?;
        self.fill(&entity, generation).await;
        Ok(entity)
    }

    /// Paged active entities, by id ascending.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for a bad page request, or a storage
    /// error.
    pub async fn find_all(&self, filter: &AuthorityFilter, page: PageRequest) -> IamResult<Page<E>> {
        page.validate()?;
        self.storage.find_page(filter, false, page).await
    }

    /// Sliced active entities; same items as [`Self::find_all`].
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for a bad page request, or a storage
    /// error.
    pub async fn find_all_slice(
        &self,
        filter: &AuthorityFilter,
        page: PageRequest,
    ) -> IamResult<Slice<E>> {
        page.validate()?;
        self.storage.find_slice(filter, false, page).await
    }

    /// Paged archived entities, by id ascending.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for a bad page request, or a storage
    /// error.
    pub async fn find_archived_all(
        &self,
        filter: &AuthorityFilter,
        page: PageRequest,
    ) -> IamResult<Page<E>> {
        page.validate()?;
        self.storage.find_page(filter, true, page).await
    }

    /// Sliced archived entities.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for a bad page request, or a storage
    /// error.
    pub async fn find_archived_all_slice(
        &self,
        filter: &AuthorityFilter,
        page: PageRequest,
    ) -> IamResult<Slice<E>> {
        page.validate()?;
        self.storage.find_slice(filter, true, page).await
    }

    /// Active entities referencing `id` (e.g. roles granting a permission).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn find_all_referencing(&self, id: i64) -> IamResult<Vec<E>> {
        self.storage.find_referencing(id).await
    }

    // =========================================================================
    // Closure table
    // =========================================================================

    /// Makes `ancestor_id` a direct ancestor of `descendant_id`.
    ///
    /// # Errors
    ///
    /// - `IamError::NotFound` if either side is absent or archived
    /// - `IamError::Cycle` if `ancestor_id` is already below `descendant_id`
    /// - `IamError::PathAlreadyExists` if the direct edge exists
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn add_ancestor(&self, descendant_id: i64, ancestor_id: i64) -> IamResult<()> {
        let mut uow = self.begin().await?;
        uow.tx().lock_hierarchy().await?;

        let descendant = self.find_active_in(&mut uow, descendant_id).await?;
        let ancestor = self.find_active_in(&mut uow, ancestor_id).await?;

        hierarchy::link(uow.tx(), ancestor_id, descendant_id).await?;

        uow.invalidate_on_commit(self.cache.keys_for(&descendant));
        uow.invalidate_on_commit(self.cache.keys_for(&ancestor));
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, ancestor_id, descendant_id, "hierarchy path added");
        Ok(())
    }

    /// Removes the direct edge `ancestor_id -> descendant_id`.
    ///
    /// Reachability through other paths is kept.
    ///
    /// # Errors
    ///
    /// - `IamError::PathNotFound` if the direct edge does not exist
    /// - `IamError::Timeout` if re-deriving the closure takes too long
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn delete_path(&self, ancestor_id: i64, descendant_id: i64) -> IamResult<()> {
        let mut uow = self.begin().await?;
        uow.tx().lock_hierarchy().await?;

        let affected = tokio::time::timeout(
            self.hierarchy.recompute_timeout,
            hierarchy::unlink(uow.tx(), ancestor_id, descendant_id),
        )
        .await
        .map_err(|_| IamError::timeout("delete_path"))??;

        self.invalidate_ids_on_commit(&mut uow, &affected).await?;
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, ancestor_id, descendant_id, "hierarchy path deleted");
        Ok(())
    }

    /// Active entities that are not the descendant of anything.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for a bad page request, or a storage
    /// error.
    pub async fn find_roots(&self, page: PageRequest) -> IamResult<Page<E>> {
        page.validate()?;
        self.storage.find_roots(page).await
    }

    /// Active direct descendants of `ancestor_id`.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for a bad page request, or a storage
    /// error.
    pub async fn find_direct_descendants(
        &self,
        ancestor_id: i64,
        page: PageRequest,
    ) -> IamResult<Page<E>> {
        page.validate()?;
        self.storage.find_direct(ancestor_id, page).await
    }

    // =========================================================================
    // Archive purge
    // =========================================================================

    /// Hard-deletes archived rows older than the deletion period.
    ///
    /// Rows still referenced are skipped and retried on the next run.
    ///
    /// # Errors
    ///
    /// Returns a storage error; rows purged before it stay purged.
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn purge_archived(&self) -> IamResult<PurgeReport> {
        let cutoff = OffsetDateTime::now_utc() - self.archive.deletion_period;
        let candidates = self
            .storage
            .find_archived_before(cutoff, self.archive.purge_batch_size)
            .await?;

        let mut report = PurgeReport::default();
        for candidate in candidates {
            let id = candidate.id();
            if let Err(e) = self.ensure_unused(id).await {
                if matches!(e, IamError::InUse { .. }) {
                    tracing::debug!(kind = %E::KIND, id, "archived authority still in use, skipping purge");
                    report.skipped += 1;
                    continue;
                }
                return Err(e);
            }

            match self.remove(id, true).await {
                Ok(true) => report.purged += 1,
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if report.purged > 0 || report.skipped > 0 {
            tracing::info!(
                kind = %E::KIND,
                purged = report.purged,
                skipped = report.skipped,
                "archive purge finished"
            );
        }
        Ok(report)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn begin(&self) -> IamResult<UnitOfWork<E>> {
        UnitOfWork::begin(self.storage.as_ref(), Arc::clone(&self.invalidator)).await
    }

    async fn find_active_in(&self, uow: &mut UnitOfWork<E>, id: i64) -> IamResult<E> {
        uow.tx()
            .find_by_id(id)
            .await?
            .filter(|e| !e.is_archived())
            .ok_or_else(|| IamError::not_found(E::KIND, id))
    }

    /// Caches a store read unless a write was invalidated since `generation`.
    async fn fill(&self, entity: &E, generation: u64) {
        if !self.invalidator.is_current(generation) {
            return;
        }
        self.cache.put(entity, self.level).await;
        // An invalidation may have run between the check and the put.
        if !self.invalidator.is_current(generation) {
            self.invalidator.invalidate(&self.cache.keys_for(entity)).await;
        }
    }

    async fn ensure_unused(&self, id: i64) -> IamResult<()> {
        let Some(guard) = &self.usage_guard else {
            return Ok(());
        };
        let used_by = guard.in_use_by(id).await?;
        if used_by.is_empty() {
            Ok(())
        } else {
            Err(IamError::InUse {
                kind: E::KIND,
                id,
                used_by,
            })
        }
    }

    /// Deletes the row and its closure rows. With `only_archived`, an entity
    /// recovered in the meantime is left alone and `false` is returned.
    async fn remove(&self, id: i64, only_archived: bool) -> IamResult<bool> {
        let mut uow = self.begin().await?;
        uow.tx().lock_hierarchy().await?;

        let entity = uow
            .tx()
            .find_by_id(id)
            .await?
            .ok_or_else(|| IamError::not_found(E::KIND, id))?;
        if only_archived && !entity.is_archived() {
            return Ok(false);
        }

        let affected = tokio::time::timeout(
            self.hierarchy.recompute_timeout,
            hierarchy::detach(uow.tx(), id),
        )
        .await
        .map_err(|_| IamError::timeout("delete"))??;

        uow.tx().delete(id).await?;
        uow.invalidate_on_commit(self.cache.keys_for(&entity));
        self.invalidate_ids_on_commit(&mut uow, &affected).await?;
        uow.commit().await?;

        tracing::info!(kind = %E::KIND, id, code = %entity.code(), "authority deleted");
        Ok(true)
    }

    /// Queues both cache keys of every id whose derived view changed.
    async fn invalidate_ids_on_commit(
        &self,
        uow: &mut UnitOfWork<E>,
        ids: &[i64],
    ) -> IamResult<()> {
        for &id in ids {
            uow.invalidate_on_commit([self.cache.id_key(id)]);
            if let Some(entity) = uow.tx().find_by_id(id).await? {
                uow.invalidate_on_commit([self.cache.code_key(entity.code())]);
            }
        }
        Ok(())
    }
}
