//! PostgreSQL storage backend for MuMu IAM
//!
//! Provides persistent storage for:
//!
//! - Roles and their closure table (`roles`, `role_paths`)
//! - Permissions and their closure table (`permissions`, `permission_paths`)
//! - OAuth 2.0 authorization records (`oauth_authorizations`)
//!
//! Hierarchy mutations of one kind are serialized with a transaction-scoped
//! advisory lock. Code uniqueness among active rows is enforced by a partial
//! unique index.
//!
//! # Example
//!
//! ```ignore
//! use mumu_iam_postgres::PostgresIamStorage;
//!
//! let storage = PostgresIamStorage::connect(&config.postgres).await?;
//! storage.migrate().await?;
//!
//! let roles = storage.roles();
//! let tokens = storage.tokens();
//! ```

pub mod authority;
pub mod migrations;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use mumu_iam::config::PostgresConfig;
use mumu_iam::error::IamError;
use mumu_iam::storage::{AuthorityStorage, TokenStorage};
use mumu_iam::types::{Permission, Role};
use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use authority::{AuthorityTable, PostgresAuthorityStorage};
pub use token::PostgresTokenStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during IAM storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The transaction was already committed or rolled back.
    #[error("Transaction already completed")]
    TransactionClosed,
}

impl StorageError {
    /// Returns `true` if this is a unique constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Database(sqlx_core::Error::Database(db)) if db.is_unique_violation())
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<StorageError> for IamError {
    fn from(err: StorageError) -> Self {
        IamError::store(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL IAM Storage
// =============================================================================

/// PostgreSQL storage backend for IAM data.
///
/// Holds a connection pool and hands out `Arc<dyn ...>` storages for the
/// gateways.
#[derive(Debug, Clone)]
pub struct PostgresIamStorage {
    pool: Arc<PgPool>,
}

impl PostgresIamStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await?;
        tracing::info!(max_connections = config.max_connections, "connected to PostgreSQL");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Migration` if a migration fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Role storage.
    #[must_use]
    pub fn roles(&self) -> Arc<dyn AuthorityStorage<Role>> {
        Arc::new(PostgresAuthorityStorage::<Role>::new(Arc::clone(&self.pool)))
    }

    /// Permission storage.
    #[must_use]
    pub fn permissions(&self) -> Arc<dyn AuthorityStorage<Permission>> {
        Arc::new(PostgresAuthorityStorage::<Permission>::new(Arc::clone(
            &self.pool,
        )))
    }

    /// Authorization record storage.
    #[must_use]
    pub fn tokens(&self) -> Arc<dyn TokenStorage> {
        Arc::new(PostgresTokenStorage::new(Arc::clone(&self.pool)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_maps_to_store_unavailable() {
        let err: IamError = StorageError::Migration("boom".to_string()).into();
        assert!(err.is_server_error());
        assert_eq!(err.to_string(), "Store unavailable: Migration error: boom");
    }

    #[test]
    fn test_storage_error_predicates() {
        let err = StorageError::Database(sqlx_core::Error::RowNotFound);
        assert!(err.is_database_error());
        assert!(!err.is_unique_violation());
        assert!(!StorageError::TransactionClosed.is_database_error());
    }
}
