//! Authority storage traits.
//!
//! Defines the interface for role and permission persistence, including the
//! closure table. Implementations are provided by storage backends
//! (`mumu-iam-memory`, `mumu-iam-postgres`).

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::IamResult;
use crate::types::{Authority, AuthorityFilter, AuthorityPath, Page, PageRequest, Slice};

/// Read-side and transaction entry point for one authority kind.
///
/// All listings order by id ascending. Reads outside a transaction see
/// committed state only.
#[async_trait]
pub trait AuthorityStorage<E: Authority>: Send + Sync {
    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn begin(&self) -> IamResult<Box<dyn AuthorityTransaction<E>>>;

    /// Find an entity by id, archived or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: i64) -> IamResult<Option<E>>;

    /// Find the active entity with this code.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_code(&self, code: &str) -> IamResult<Option<E>>;

    /// Paged listing of active (`archived == false`) or archived entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_page(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Page<E>>;

    /// Sliced listing; same ordering and filtering as [`Self::find_page`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_slice(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Slice<E>>;

    /// Active entities that are not the descendant of any other entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_roots(&self, page: PageRequest) -> IamResult<Page<E>>;

    /// Active entities at depth 1 below `ancestor_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_direct(&self, ancestor_id: i64, page: PageRequest) -> IamResult<Page<E>>;

    /// Archived entities whose `archived_at` is before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_archived_before(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> IamResult<Vec<E>>;

    /// Active entities whose [`Authority::references`] contain `referenced_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_referencing(&self, referenced_id: i64) -> IamResult<Vec<E>>;
}

/// A transaction over one authority kind and its closure table.
///
/// Dropping the transaction without committing discards its writes.
#[async_trait]
pub trait AuthorityTransaction<E: Authority>: Send + Sync {
    /// Commits all operations in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    async fn commit(self: Box<Self>) -> IamResult<()>;

    /// Rolls back all operations in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    async fn rollback(self: Box<Self>) -> IamResult<()>;

    /// Serializes hierarchy mutations of this kind until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    async fn lock_hierarchy(&mut self) -> IamResult<()>;

    /// Find an entity by id, archived or not. Sees uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&mut self, id: i64) -> IamResult<Option<E>>;

    /// Find the active entity with this code. Sees uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_active_by_code(&mut self, code: &str) -> IamResult<Option<E>>;

    /// Allocates the next free id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn next_id(&mut self) -> IamResult<i64>;

    /// Inserts a new entity with a non-zero id.
    ///
    /// # Errors
    ///
    /// Returns `IamError::DuplicateId` / `IamError::DuplicateCode` on a
    /// uniqueness violation, or a storage error.
    async fn insert(&mut self, entity: &E) -> IamResult<()>;

    /// Overwrites an existing entity.
    ///
    /// # Errors
    ///
    /// Returns `IamError::NotFound` if the entity does not exist,
    /// `IamError::DuplicateCode` on a uniqueness violation, or a storage error.
    async fn update(&mut self, entity: &E) -> IamResult<()>;

    /// Removes an entity. Returns `false` if it did not exist.
    ///
    /// Closure rows are not touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&mut self, id: i64) -> IamResult<bool>;

    /// Closure rows whose descendant is `descendant_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn paths_to(&mut self, descendant_id: i64) -> IamResult<Vec<AuthorityPath>>;

    /// Closure rows whose ancestor is any of `ancestor_ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>>;

    /// Depth-1 rows whose ancestor is any of `ancestor_ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn direct_paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>>;

    /// Inserts rows, keeping the smaller depth when a pair already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn merge_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()>;

    /// Inserts rows, overwriting the depth when a pair already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()>;

    /// Removes rows by `(ancestor, descendant)` pair. Missing pairs are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_paths(&mut self, pairs: &[(i64, i64)]) -> IamResult<()>;
}
