//! OAuth 2.0 authorization record storage.
//!
//! Records are stored as JSONB with each token value mirrored into its own
//! indexed column. `expires_at` holds the latest expiry across the present
//! tokens, or NULL when one of them never expires.

use std::sync::Arc;

use async_trait::async_trait;
use mumu_iam::IamResult;
use mumu_iam::storage::TokenStorage;
use mumu_iam::types::{TokenKind, TokenRecord};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, StorageResult};

/// PostgreSQL storage for authorization records.
pub struct PostgresTokenStorage {
    pool: Arc<PgPool>,
}

impl PostgresTokenStorage {
    /// Create a new storage over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn upsert(&self, record: &TokenRecord) -> StorageResult<()> {
        let resource = serde_json::to_value(record)?;
        let value = |kind: TokenKind| record.token(kind).map(|t| t.value.clone());

        query(
            r#"
            INSERT INTO oauth_authorizations (
                id, principal_name,
                authorization_code_value, access_token_value,
                refresh_token_value, oidc_id_token_value,
                expires_at, resource
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                principal_name = EXCLUDED.principal_name,
                authorization_code_value = EXCLUDED.authorization_code_value,
                access_token_value = EXCLUDED.access_token_value,
                refresh_token_value = EXCLUDED.refresh_token_value,
                oidc_id_token_value = EXCLUDED.oidc_id_token_value,
                expires_at = EXCLUDED.expires_at,
                resource = EXCLUDED.resource
            "#,
        )
        .bind(&record.id)
        .bind(&record.principal_name)
        .bind(value(TokenKind::AuthorizationCode))
        .bind(value(TokenKind::AccessToken))
        .bind(value(TokenKind::RefreshToken))
        .bind(value(TokenKind::OidcIdToken))
        .bind(latest_expiry(record))
        .bind(&resource)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn by_id(&self, id: &str) -> StorageResult<Option<TokenRecord>> {
        let row: Option<(serde_json::Value,)> =
            query_as("SELECT resource FROM oauth_authorizations WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.as_ref())
                .await?;
        Ok(row.map(|(r,)| serde_json::from_value(r)).transpose()?)
    }

    async fn by_value(&self, kind: TokenKind, value: &str) -> StorageResult<Option<TokenRecord>> {
        let sql = format!(
            "SELECT resource FROM oauth_authorizations WHERE {} = $1 LIMIT 1",
            value_column(kind)
        );
        let row: Option<(serde_json::Value,)> = query_as(&sql)
            .bind(value)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|(r,)| serde_json::from_value(r)).transpose()?)
    }

    async fn remove(&self, id: &str) -> StorageResult<bool> {
        let done = query("DELETE FROM oauth_authorizations WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn remove_by_principal(&self, principal_name: &str) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> =
            query_as("DELETE FROM oauth_authorizations WHERE principal_name = $1 RETURNING id")
                .bind(principal_name)
                .fetch_all(self.pool.as_ref())
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn remove_expired(&self, now: OffsetDateTime) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = query_as(
            r#"
            DELETE FROM oauth_authorizations
            WHERE (expires_at IS NOT NULL AND expires_at <= $1)
               OR (authorization_code_value IS NULL
                   AND access_token_value IS NULL
                   AND refresh_token_value IS NULL
                   AND oidc_id_token_value IS NULL)
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        if !rows.is_empty() {
            tracing::debug!(count = rows.len(), "expired authorization records removed");
        }
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

fn value_column(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::AuthorizationCode => "authorization_code_value",
        TokenKind::AccessToken => "access_token_value",
        TokenKind::RefreshToken => "refresh_token_value",
        TokenKind::OidcIdToken => "oidc_id_token_value",
    }
}

/// Latest expiry of the present tokens; `None` if any is unbounded or the
/// record holds no tokens.
fn latest_expiry(record: &TokenRecord) -> Option<OffsetDateTime> {
    let mut latest = None;
    for kind in [
        TokenKind::AuthorizationCode,
        TokenKind::AccessToken,
        TokenKind::RefreshToken,
        TokenKind::OidcIdToken,
    ] {
        let Some(token) = record.token(kind) else {
            continue;
        };
        let exp = token.expires_at?;
        latest = Some(latest.map_or(exp, |cur: OffsetDateTime| cur.max(exp)));
    }
    latest
}

#[async_trait]
impl TokenStorage for PostgresTokenStorage {
    async fn save(&self, record: &TokenRecord) -> IamResult<()> {
        Ok(self.upsert(record).await?)
    }

    async fn find_by_id(&self, id: &str) -> IamResult<Option<TokenRecord>> {
        Ok(self.by_id(id).await?)
    }

    async fn find_by_token_value(
        &self,
        kind: TokenKind,
        value: &str,
    ) -> IamResult<Option<TokenRecord>> {
        Ok(self.by_value(kind, value).await?)
    }

    async fn delete(&self, id: &str) -> IamResult<bool> {
        Ok(self.remove(id).await?)
    }

    async fn delete_by_principal(&self, principal_name: &str) -> IamResult<Vec<String>> {
        Ok(self.remove_by_principal(principal_name).await?)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> IamResult<Vec<String>> {
        Ok(self.remove_expired(now).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mumu_iam::types::{AuthorizationGrantType, TokenValue};
    use time::Duration;

    fn record() -> TokenRecord {
        TokenRecord::new("web", "alice", AuthorizationGrantType::AuthorizationCode)
    }

    #[test]
    fn test_latest_expiry() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(latest_expiry(&record()), None);

        let bounded = record()
            .with_token(
                TokenKind::AccessToken,
                TokenValue::new("a", now, Some(now + Duration::minutes(5))),
            )
            .with_token(
                TokenKind::RefreshToken,
                TokenValue::new("r", now, Some(now + Duration::hours(1))),
            );
        assert_eq!(latest_expiry(&bounded), Some(now + Duration::hours(1)));

        let unbounded = bounded.with_token(TokenKind::OidcIdToken, TokenValue::new("i", now, None));
        assert_eq!(latest_expiry(&unbounded), None);
    }

    #[test]
    fn test_value_columns_are_distinct() {
        let columns = [
            TokenKind::AuthorizationCode,
            TokenKind::AccessToken,
            TokenKind::RefreshToken,
            TokenKind::OidcIdToken,
        ]
        .map(value_column);
        for (i, a) in columns.iter().enumerate() {
            assert!(a.ends_with("_value"));
            assert!(columns[i + 1..].iter().all(|b| b != a));
        }
    }
}
