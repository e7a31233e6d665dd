//! In-memory authority storage with a closure table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mumu_iam::IamResult;
use mumu_iam::error::IamError;
use mumu_iam::storage::{AuthorityStorage, AuthorityTransaction};
use mumu_iam::types::{Authority, AuthorityFilter, AuthorityPath, Page, PageRequest, Slice};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Rows and closure of one authority kind.
#[derive(Debug, Clone)]
struct State<E> {
    rows: BTreeMap<i64, E>,
    /// `(ancestor, descendant) -> depth`
    paths: BTreeMap<(i64, i64), i32>,
    next_id: i64,
}

impl<E> Default for State<E> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            paths: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<E: Authority> State<E> {
    fn has_descendant(&self, id: i64) -> bool {
        self.paths
            .range((id, i64::MIN)..=(id, i64::MAX))
            .next()
            .is_some()
    }

    /// Clones a row with its derived flag filled in.
    fn load(&self, entity: &E) -> E {
        let mut entity = entity.clone();
        entity.set_has_descendant(self.has_descendant(entity.id()));
        entity
    }

    fn get(&self, id: i64) -> Option<E> {
        self.rows.get(&id).map(|e| self.load(e))
    }

    fn active_by_code(&self, code: &str) -> Option<E> {
        self.rows
            .values()
            .find(|e| !e.is_archived() && e.code() == code)
            .map(|e| self.load(e))
    }

    fn code_taken(&self, entity: &E) -> bool {
        !entity.is_archived()
            && self
                .rows
                .values()
                .any(|e| !e.is_archived() && e.code() == entity.code() && e.id() != entity.id())
    }

    fn listing(&self, filter: &AuthorityFilter, archived: bool) -> Vec<E> {
        self.rows
            .values()
            .filter(|e| e.is_archived() == archived && filter.matches(*e))
            .map(|e| self.load(e))
            .collect()
    }

    fn paths_where(&self, mut keep: impl FnMut(i64, i64, i32) -> bool) -> Vec<AuthorityPath> {
        self.paths
            .iter()
            .filter(|&(&(a, d), &depth)| keep(a, d, depth))
            .map(|(&(a, d), &depth)| AuthorityPath::new(a, d, depth))
            .collect()
    }
}

/// In-memory storage for one authority kind.
pub struct MemoryAuthorityStorage<E> {
    committed: Arc<RwLock<Arc<State<E>>>>,
    writer: Arc<Mutex<()>>,
}

impl<E> Default for MemoryAuthorityStorage<E> {
    fn default() -> Self {
        Self {
            committed: Arc::new(RwLock::new(Arc::new(State::default()))),
            writer: Arc::new(Mutex::new(())),
        }
    }
}

impl<E> fmt::Debug for MemoryAuthorityStorage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuthorityStorage").finish_non_exhaustive()
    }
}

impl<E: Authority> MemoryAuthorityStorage<E> {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self) -> Arc<State<E>> {
        Arc::clone(&*self.committed.read().await)
    }
}

#[async_trait]
impl<E: Authority> AuthorityStorage<E> for MemoryAuthorityStorage<E> {
    async fn begin(&self) -> IamResult<Box<dyn AuthorityTransaction<E>>> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let state = (*self.snapshot().await).clone();
        Ok(Box::new(MemoryAuthorityTransaction {
            committed: Arc::clone(&self.committed),
            _writer: writer,
            state,
        }))
    }

    async fn find_by_id(&self, id: i64) -> IamResult<Option<E>> {
        Ok(self.snapshot().await.get(id))
    }

    async fn find_by_code(&self, code: &str) -> IamResult<Option<E>> {
        Ok(self.snapshot().await.active_by_code(code))
    }

    async fn find_page(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Page<E>> {
        let all = self.snapshot().await.listing(filter, archived);
        Ok(Page::from_sorted(all, page))
    }

    async fn find_slice(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Slice<E>> {
        let all = self.snapshot().await.listing(filter, archived);
        Ok(Slice::from_sorted(all, page))
    }

    async fn find_roots(&self, page: PageRequest) -> IamResult<Page<E>> {
        let state = self.snapshot().await;
        let below: BTreeSet<i64> = state.paths.keys().map(|&(_, d)| d).collect();
        let roots = state
            .rows
            .values()
            .filter(|e| !e.is_archived() && !below.contains(&e.id()))
            .map(|e| state.load(e))
            .collect();
        Ok(Page::from_sorted(roots, page))
    }

    async fn find_direct(&self, ancestor_id: i64, page: PageRequest) -> IamResult<Page<E>> {
        let state = self.snapshot().await;
        let children = state
            .paths
            .range((ancestor_id, i64::MIN)..=(ancestor_id, i64::MAX))
            .filter(|&(_, &depth)| depth == 1)
            .filter_map(|(&(_, d), _)| state.rows.get(&d))
            .filter(|e| !e.is_archived())
            .map(|e| state.load(e))
            .collect();
        Ok(Page::from_sorted(children, page))
    }

    async fn find_archived_before(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> IamResult<Vec<E>> {
        let state = self.snapshot().await;
        let mut expired: Vec<E> = state
            .rows
            .values()
            .filter(|e| e.is_archived() && e.audit().archived_at.is_some_and(|at| at < cutoff))
            .map(|e| state.load(e))
            .collect();
        expired.sort_by_key(|e| (e.audit().archived_at, e.id()));
        expired.truncate(limit);
        Ok(expired)
    }

    async fn find_referencing(&self, referenced_id: i64) -> IamResult<Vec<E>> {
        let state = self.snapshot().await;
        Ok(state
            .rows
            .values()
            .filter(|e| !e.is_archived() && e.references().contains(&referenced_id))
            .map(|e| state.load(e))
            .collect())
    }
}

/// A serialized write transaction over a private copy of the state.
struct MemoryAuthorityTransaction<E> {
    committed: Arc<RwLock<Arc<State<E>>>>,
    _writer: OwnedMutexGuard<()>,
    state: State<E>,
}

#[async_trait]
impl<E: Authority> AuthorityTransaction<E> for MemoryAuthorityTransaction<E> {
    async fn commit(self: Box<Self>) -> IamResult<()> {
        let this = *self;
        *this.committed.write().await = Arc::new(this.state);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> IamResult<()> {
        Ok(())
    }

    async fn lock_hierarchy(&mut self) -> IamResult<()> {
        // Transactions are already serialized per kind.
        Ok(())
    }

    async fn find_by_id(&mut self, id: i64) -> IamResult<Option<E>> {
        Ok(self.state.get(id))
    }

    async fn find_active_by_code(&mut self, code: &str) -> IamResult<Option<E>> {
        Ok(self.state.active_by_code(code))
    }

    async fn next_id(&mut self) -> IamResult<i64> {
        while self.state.rows.contains_key(&self.state.next_id) {
            self.state.next_id += 1;
        }
        let id = self.state.next_id;
        self.state.next_id += 1;
        Ok(id)
    }

    async fn insert(&mut self, entity: &E) -> IamResult<()> {
        let id = entity.id();
        if id == 0 {
            return Err(IamError::invalid_input("insert requires an allocated id"));
        }
        if self.state.rows.contains_key(&id) {
            return Err(IamError::DuplicateId { kind: E::KIND, id });
        }
        if self.state.code_taken(entity) {
            return Err(IamError::duplicate_code(E::KIND, entity.code()));
        }

        self.state.next_id = self.state.next_id.max(id.saturating_add(1));
        self.state.rows.insert(id, entity.clone());
        Ok(())
    }

    async fn update(&mut self, entity: &E) -> IamResult<()> {
        let id = entity.id();
        if !self.state.rows.contains_key(&id) {
            return Err(IamError::not_found(E::KIND, id));
        }
        if self.state.code_taken(entity) {
            return Err(IamError::duplicate_code(E::KIND, entity.code()));
        }

        self.state.rows.insert(id, entity.clone());
        Ok(())
    }

    async fn delete(&mut self, id: i64) -> IamResult<bool> {
        Ok(self.state.rows.remove(&id).is_some())
    }

    async fn paths_to(&mut self, descendant_id: i64) -> IamResult<Vec<AuthorityPath>> {
        Ok(self.state.paths_where(|_, d, _| d == descendant_id))
    }

    async fn paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>> {
        Ok(self.state.paths_where(|a, _, _| ancestor_ids.contains(&a)))
    }

    async fn direct_paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>> {
        Ok(self
            .state
            .paths_where(|a, _, depth| depth == 1 && ancestor_ids.contains(&a)))
    }

    async fn merge_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()> {
        for path in paths {
            self.state
                .paths
                .entry(path.pair())
                .and_modify(|depth| *depth = (*depth).min(path.depth))
                .or_insert(path.depth);
        }
        Ok(())
    }

    async fn save_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()> {
        for path in paths {
            self.state.paths.insert(path.pair(), path.depth);
        }
        Ok(())
    }

    async fn delete_paths(&mut self, pairs: &[(i64, i64)]) -> IamResult<()> {
        for pair in pairs {
            self.state.paths.remove(pair);
        }
        Ok(())
    }
}
