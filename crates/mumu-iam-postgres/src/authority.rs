//! Role and permission storage with a closure table.
//!
//! One generic implementation serves both kinds; [`AuthorityTable`] names the
//! tables of each kind. Entities are stored as JSONB with the filterable
//! fields mirrored into columns. `has_descendant` is derived on read from the
//! closure table.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use mumu_iam::IamResult;
use mumu_iam::error::IamError;
use mumu_iam::storage::{AuthorityStorage, AuthorityTransaction};
use mumu_iam::types::{
    Authority, AuthorityFilter, AuthorityPath, Page, PageRequest, Permission, Role, Slice,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::{PgTransaction, Postgres};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Table Descriptors
// =============================================================================

/// Tables backing one authority kind.
pub trait AuthorityTable: Authority {
    /// Entity table.
    const TABLE: &'static str;
    /// Closure table.
    const PATH_TABLE: &'static str;
    /// Id sequence.
    const ID_SEQUENCE: &'static str;
}

impl AuthorityTable for Role {
    const TABLE: &'static str = "roles";
    const PATH_TABLE: &'static str = "role_paths";
    const ID_SEQUENCE: &'static str = "roles_id_seq";
}

impl AuthorityTable for Permission {
    const TABLE: &'static str = "permissions";
    const PATH_TABLE: &'static str = "permission_paths";
    const ID_SEQUENCE: &'static str = "permissions_id_seq";
}

/// `(resource, has_descendant)`
type EntityRow = (serde_json::Value, bool);

/// `(ancestor_id, descendant_id, depth)`
type PathRow = (i64, i64, i32);

/// Builds a query selecting [`EntityRow`]s from the entity table aliased `t`.
fn select<E: AuthorityTable>(tail: &str) -> String {
    format!(
        "SELECT t.resource, EXISTS (SELECT 1 FROM {paths} p WHERE p.ancestor_id = t.id) \
         FROM {table} t {tail}",
        paths = E::PATH_TABLE,
        table = E::TABLE,
    )
}

fn decode<E: Authority>((resource, has_descendant): EntityRow) -> StorageResult<E> {
    let mut entity: E = serde_json::from_value(resource)?;
    entity.set_has_descendant(has_descendant);
    Ok(entity)
}

fn decode_all<E: Authority>(rows: Vec<EntityRow>) -> StorageResult<Vec<E>> {
    rows.into_iter().map(decode).collect()
}

fn to_path((ancestor_id, descendant_id, depth): PathRow) -> AuthorityPath {
    AuthorityPath::new(ancestor_id, descendant_id, depth)
}

fn bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

const FILTER: &str = "WHERE t.archived = $1 \
     AND ($2::text IS NULL OR t.code = $2) \
     AND ($3::text IS NULL OR strpos(lower(t.name), lower($3)) > 0)";

// =============================================================================
// Storage
// =============================================================================

/// PostgreSQL storage for one authority kind.
pub struct PostgresAuthorityStorage<E> {
    pool: Arc<PgPool>,
    _kind: PhantomData<fn() -> E>,
}

impl<E: AuthorityTable> PostgresAuthorityStorage<E> {
    /// Create a new storage over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            _kind: PhantomData,
        }
    }

    async fn by_code(&self, code: &str) -> StorageResult<Option<E>> {
        let sql = select::<E>("WHERE t.code = $1 AND NOT t.archived");
        let row: Option<EntityRow> = query_as(&sql)
            .bind(code)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(decode).transpose()
    }

    async fn by_id(&self, id: i64) -> StorageResult<Option<E>> {
        let sql = select::<E>("WHERE t.id = $1");
        let row: Option<EntityRow> = query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(decode).transpose()
    }

    async fn listing(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        offset: u64,
        limit: u64,
    ) -> StorageResult<Vec<E>> {
        let sql = select::<E>(&format!("{FILTER} ORDER BY t.id LIMIT $4 OFFSET $5"));
        let rows: Vec<EntityRow> = query_as(&sql)
            .bind(archived)
            .bind(filter.code.as_deref())
            .bind(filter.name.as_deref())
            .bind(bound(limit))
            .bind(bound(offset))
            .fetch_all(self.pool.as_ref())
            .await?;
        decode_all(rows)
    }

    async fn count(&self, filter: &AuthorityFilter, archived: bool) -> StorageResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} t {FILTER}", E::TABLE);
        let (total,): (i64,) = query_as(&sql)
            .bind(archived)
            .bind(filter.code.as_deref())
            .bind(filter.name.as_deref())
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(total.max(0) as u64)
    }

    /// Pages over `tail`, which may use `$1` when `arg` is given.
    async fn page_where(
        &self,
        tail: &str,
        arg: Option<i64>,
        page: PageRequest,
    ) -> StorageResult<Page<E>> {
        let (limit_at, offset_at) = if arg.is_some() { (2, 3) } else { (1, 2) };
        let sql = select::<E>(&format!(
            "{tail} ORDER BY t.id LIMIT ${limit_at} OFFSET ${offset_at}"
        ));
        let mut rows_query = query_as::<Postgres, EntityRow>(&sql);
        if let Some(arg) = arg {
            rows_query = rows_query.bind(arg);
        }
        let rows = rows_query
            .bind(bound(page.limit()))
            .bind(bound(page.offset()))
            .fetch_all(self.pool.as_ref())
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM {} t {tail}", E::TABLE);
        let mut count_query = query_as::<Postgres, (i64,)>(&count_sql);
        if let Some(arg) = arg {
            count_query = count_query.bind(arg);
        }
        let (total,) = count_query.fetch_one(self.pool.as_ref()).await?;

        Ok(Page::new(decode_all(rows)?, page, total.max(0) as u64))
    }
}

#[async_trait]
impl<E: AuthorityTable> AuthorityStorage<E> for PostgresAuthorityStorage<E> {
    async fn begin(&self) -> IamResult<Box<dyn AuthorityTransaction<E>>> {
        let tx = self.pool.begin().await.map_err(StorageError::from)?;
        Ok(Box::new(PostgresAuthorityTransaction::<E>::new(tx)))
    }

    async fn find_by_id(&self, id: i64) -> IamResult<Option<E>> {
        Ok(self.by_id(id).await?)
    }

    async fn find_by_code(&self, code: &str) -> IamResult<Option<E>> {
        Ok(self.by_code(code).await?)
    }

    async fn find_page(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Page<E>> {
        let items = self
            .listing(filter, archived, page.offset(), page.limit())
            .await?;
        let total = self.count(filter, archived).await?;
        Ok(Page::new(items, page, total))
    }

    async fn find_slice(
        &self,
        filter: &AuthorityFilter,
        archived: bool,
        page: PageRequest,
    ) -> IamResult<Slice<E>> {
        let items = self
            .listing(filter, archived, page.offset(), page.limit() + 1)
            .await?;
        Ok(Slice::from_overfetch(items, page))
    }

    async fn find_roots(&self, page: PageRequest) -> IamResult<Page<E>> {
        let tail = format!(
            "WHERE NOT t.archived \
             AND NOT EXISTS (SELECT 1 FROM {} r WHERE r.descendant_id = t.id)",
            E::PATH_TABLE
        );
        Ok(self.page_where(&tail, None, page).await?)
    }

    async fn find_direct(&self, ancestor_id: i64, page: PageRequest) -> IamResult<Page<E>> {
        let tail = format!(
            "WHERE NOT t.archived \
             AND EXISTS (SELECT 1 FROM {} r \
                         WHERE r.ancestor_id = $1 AND r.descendant_id = t.id AND r.depth = 1)",
            E::PATH_TABLE
        );
        Ok(self.page_where(&tail, Some(ancestor_id), page).await?)
    }

    async fn find_archived_before(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> IamResult<Vec<E>> {
        let sql = select::<E>(
            "WHERE t.archived AND t.archived_at < $1 ORDER BY t.archived_at, t.id LIMIT $2",
        );
        let rows: Vec<EntityRow> = query_as(&sql)
            .bind(cutoff)
            .bind(bound(limit as u64))
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(StorageError::from)?;
        Ok(decode_all(rows)?)
    }

    async fn find_referencing(&self, referenced_id: i64) -> IamResult<Vec<E>> {
        let sql = select::<E>("WHERE NOT t.archived AND $1 = ANY(t.refs) ORDER BY t.id");
        let rows: Vec<EntityRow> = query_as(&sql)
            .bind(referenced_id)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(StorageError::from)?;
        Ok(decode_all(rows)?)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A database transaction over one authority kind.
///
/// The underlying sqlx transaction rolls back on drop if not committed.
pub struct PostgresAuthorityTransaction<E> {
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
    _kind: PhantomData<fn() -> E>,
}

impl<E: AuthorityTable> PostgresAuthorityTransaction<E> {
    fn new(tx: PgTransaction<'static>) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
            _kind: PhantomData,
        }
    }

    fn conn(&mut self) -> StorageResult<&mut PgTransaction<'static>> {
        self.tx
            .get_mut()
            .as_deref_mut()
            .ok_or(StorageError::TransactionClosed)
    }

    async fn fetch_entity(&mut self, tail: &str, arg: EntityArg<'_>) -> StorageResult<Option<E>> {
        let sql = select::<E>(tail);
        let tx = self.conn()?;
        let q = query_as::<Postgres, EntityRow>(&sql);
        let q = match arg {
            EntityArg::Id(id) => q.bind(id),
            EntityArg::Code(code) => q.bind(code.to_string()),
        };
        let row = q.fetch_optional(&mut **tx).await?;
        row.map(decode).transpose()
    }

    async fn fetch_paths(&mut self, sql: String, ids: Vec<i64>) -> StorageResult<Vec<AuthorityPath>> {
        let tx = self.conn()?;
        let rows: Vec<PathRow> = query_as(&sql).bind(ids).fetch_all(&mut **tx).await?;
        Ok(rows.into_iter().map(to_path).collect())
    }

    async fn upsert_paths(&mut self, paths: &[AuthorityPath], on_conflict: &str) -> StorageResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let ancestors: Vec<i64> = paths.iter().map(|p| p.ancestor_id).collect();
        let descendants: Vec<i64> = paths.iter().map(|p| p.descendant_id).collect();
        let depths: Vec<i32> = paths.iter().map(|p| p.depth).collect();

        let sql = format!(
            "INSERT INTO {table} (ancestor_id, descendant_id, depth) \
             SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::int[]) \
             ON CONFLICT (ancestor_id, descendant_id) DO UPDATE SET depth = {on_conflict}",
            table = E::PATH_TABLE,
        );
        let tx = self.conn()?;
        query(&sql)
            .bind(ancestors)
            .bind(descendants)
            .bind(depths)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Maps a unique violation on an entity write to the typed error.
    fn write_error(err: sqlx_core::Error, entity: &E) -> IamError {
        let sqlx_core::Error::Database(db_err) = &err else {
            return StorageError::from(err).into();
        };
        if !db_err.is_unique_violation() {
            return StorageError::from(err).into();
        }

        let pkey = format!("{}_pkey", E::TABLE);
        if db_err.constraint() == Some(pkey.as_str()) {
            IamError::DuplicateId {
                kind: E::KIND,
                id: entity.id(),
            }
        } else {
            IamError::duplicate_code(E::KIND, entity.code())
        }
    }
}

enum EntityArg<'a> {
    Id(i64),
    Code(&'a str),
}

#[async_trait]
impl<E: AuthorityTable> AuthorityTransaction<E> for PostgresAuthorityTransaction<E> {
    async fn commit(mut self: Box<Self>) -> IamResult<()> {
        if let Some(tx) = self.tx.get_mut().take() {
            tx.commit().await.map_err(StorageError::from)?;
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> IamResult<()> {
        if let Some(tx) = self.tx.get_mut().take() {
            tx.rollback().await.map_err(StorageError::from)?;
        }
        Ok(())
    }

    async fn lock_hierarchy(&mut self) -> IamResult<()> {
        let tx = self.conn()?;
        query("SELECT pg_advisory_xact_lock($1)")
            .bind(E::KIND.lock_key())
            .execute(&mut **tx)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn find_by_id(&mut self, id: i64) -> IamResult<Option<E>> {
        Ok(self.fetch_entity("WHERE t.id = $1", EntityArg::Id(id)).await?)
    }

    async fn find_active_by_code(&mut self, code: &str) -> IamResult<Option<E>> {
        Ok(self
            .fetch_entity("WHERE t.code = $1 AND NOT t.archived", EntityArg::Code(code))
            .await?)
    }

    async fn next_id(&mut self) -> IamResult<i64> {
        let sql = format!("SELECT nextval('{}')", E::ID_SEQUENCE);
        let tx = self.conn()?;
        let (id,): (i64,) = query_as(&sql)
            .fetch_one(&mut **tx)
            .await
            .map_err(StorageError::from)?;
        Ok(id)
    }

    async fn insert(&mut self, entity: &E) -> IamResult<()> {
        let resource = serde_json::to_value(entity).map_err(StorageError::from)?;
        let sql = format!(
            "INSERT INTO {} (id, code, name, archived, archived_at, refs, resource) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            E::TABLE
        );
        let result = {
            let tx = self.conn()?;
            query(&sql)
                .bind(entity.id())
                .bind(entity.code())
                .bind(entity.name())
                .bind(entity.is_archived())
                .bind(entity.audit().archived_at)
                .bind(entity.references())
                .bind(&resource)
                .execute(&mut **tx)
                .await
        };
        if let Err(e) = result {
            return Err(Self::write_error(e, entity));
        }

        // Keep the sequence ahead of caller-chosen ids.
        let sql = format!(
            "SELECT setval('{seq}', GREATEST($1, (SELECT last_value FROM {seq})))",
            seq = E::ID_SEQUENCE
        );
        let tx = self.conn()?;
        query(&sql)
            .bind(entity.id())
            .execute(&mut **tx)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn update(&mut self, entity: &E) -> IamResult<()> {
        let resource = serde_json::to_value(entity).map_err(StorageError::from)?;
        let sql = format!(
            "UPDATE {} SET code = $2, name = $3, archived = $4, archived_at = $5, \
             refs = $6, resource = $7 WHERE id = $1",
            E::TABLE
        );
        let result = {
            let tx = self.conn()?;
            query(&sql)
                .bind(entity.id())
                .bind(entity.code())
                .bind(entity.name())
                .bind(entity.is_archived())
                .bind(entity.audit().archived_at)
                .bind(entity.references())
                .bind(&resource)
                .execute(&mut **tx)
                .await
        };
        match result {
            Ok(done) if done.rows_affected() == 0 => Err(IamError::not_found(E::KIND, entity.id())),
            Ok(_) => Ok(()),
            Err(e) => Err(Self::write_error(e, entity)),
        }
    }

    async fn delete(&mut self, id: i64) -> IamResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", E::TABLE);
        let tx = self.conn()?;
        let done = query(&sql)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(StorageError::from)?;
        Ok(done.rows_affected() > 0)
    }

    async fn paths_to(&mut self, descendant_id: i64) -> IamResult<Vec<AuthorityPath>> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {} WHERE descendant_id = ANY($1)",
            E::PATH_TABLE
        );
        Ok(self.fetch_paths(sql, vec![descendant_id]).await?)
    }

    async fn paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {} WHERE ancestor_id = ANY($1)",
            E::PATH_TABLE
        );
        Ok(self.fetch_paths(sql, ancestor_ids.to_vec()).await?)
    }

    async fn direct_paths_from(&mut self, ancestor_ids: &[i64]) -> IamResult<Vec<AuthorityPath>> {
        let sql = format!(
            "SELECT ancestor_id, descendant_id, depth FROM {} \
             WHERE ancestor_id = ANY($1) AND depth = 1",
            E::PATH_TABLE
        );
        Ok(self.fetch_paths(sql, ancestor_ids.to_vec()).await?)
    }

    async fn merge_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()> {
        let keep_shorter = format!("LEAST({}.depth, EXCLUDED.depth)", E::PATH_TABLE);
        Ok(self.upsert_paths(paths, &keep_shorter).await?)
    }

    async fn save_paths(&mut self, paths: &[AuthorityPath]) -> IamResult<()> {
        Ok(self.upsert_paths(paths, "EXCLUDED.depth").await?)
    }

    async fn delete_paths(&mut self, pairs: &[(i64, i64)]) -> IamResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let (ancestors, descendants): (Vec<i64>, Vec<i64>) = pairs.iter().copied().unzip();
        let sql = format!(
            "DELETE FROM {} p USING UNNEST($1::bigint[], $2::bigint[]) AS d(a, b) \
             WHERE p.ancestor_id = d.a AND p.descendant_id = d.b",
            E::PATH_TABLE
        );
        let tx = self.conn()?;
        query(&sql)
            .bind(ancestors)
            .bind(descendants)
            .execute(&mut **tx)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

impl<E> Drop for PostgresAuthorityTransaction<E> {
    fn drop(&mut self) {
        if self.tx.get_mut().is_some() {
            tracing::debug!("authority transaction dropped without commit, rolling back");
        }
    }
}
