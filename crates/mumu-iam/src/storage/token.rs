//! Token storage trait.
//!
//! Persists OAuth 2.0 authorization records. Lookups by token value must be
//! exact matches on the slot's value.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::IamResult;
use crate::types::{TokenKind, TokenRecord};

/// Storage operations for authorization records.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Inserts or replaces a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(&self, record: &TokenRecord) -> IamResult<()>;

    /// Find a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: &str) -> IamResult<Option<TokenRecord>>;

    /// Find the record whose `kind` slot holds `value`.
    ///
    /// Expiry is not checked here.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_token_value(
        &self,
        kind: TokenKind,
        value: &str,
    ) -> IamResult<Option<TokenRecord>>;

    /// Removes a record. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, id: &str) -> IamResult<bool>;

    /// Removes every record of a principal and returns their ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_by_principal(&self, principal_name: &str) -> IamResult<Vec<String>>;

    /// Removes every record whose tokens have all expired at `now` and
    /// returns their ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, now: OffsetDateTime) -> IamResult<Vec<String>>;
}
