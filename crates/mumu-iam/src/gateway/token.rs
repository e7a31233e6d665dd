//! OAuth 2.0 authorization record gateway.
//!
//! ## Token Lifecycle
//!
//! `ISSUED -> ISSUED (rotated values)`, `ISSUED -> EXPIRED` (detected lazily
//! on lookup) and `ISSUED -> REVOKED` (record deleted). Expired and revoked
//! records look absent to callers.
//!
//! ## Cache Keys
//!
//! Authorization codes and ID tokens are mirrored into the cache on save,
//! keyed by authorization id, with the HIGH tier TTL capped at the token's
//! remaining lifetime:
//!
//! - `{prefix}:token:authorization_code:{id}`
//! - `{prefix}:token:oidc_id_token:{id}`

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::instrument;

use crate::cache::{CacheCounters, CacheLevel, CacheStats, CacheStore, Invalidator};
use crate::config::CacheConfig;
use crate::error::{IamError, IamResult};
use crate::gateway::TokenValidator;
use crate::storage::TokenStorage;
use crate::types::{TokenKind, TokenRecord, TokenValue};

/// Slots mirrored into the cache.
const CACHED_KINDS: [TokenKind; 2] = [TokenKind::AuthorizationCode, TokenKind::OidcIdToken];

/// Persistent store plus cache mirror for authorization records.
pub struct TokenGateway {
    storage: Arc<dyn TokenStorage>,
    cache: Arc<dyn CacheStore>,
    invalidator: Arc<Invalidator>,
    validator: TokenValidator,
    prefix: String,
    ttl: Duration,
    counters: CacheCounters,
}

impl TokenGateway {
    /// Creates a token gateway.
    pub fn new(
        storage: Arc<dyn TokenStorage>,
        cache: Arc<dyn CacheStore>,
        invalidator: Arc<Invalidator>,
        validator: TokenValidator,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            invalidator,
            validator,
            prefix: cache_config.key_prefix.clone(),
            ttl: cache_config.ttl.for_level(CacheLevel::High),
            counters: CacheCounters::default(),
        }
    }

    /// Cache key of a mirrored token slot.
    pub fn cache_key(&self, kind: TokenKind, authorization_id: &str) -> String {
        format!("{}:token:{}:{}", self.prefix, kind, authorization_id)
    }

    /// Cache statistics for monitoring.
    pub fn cache_stats(&self) -> CacheStats {
        self.counters.snapshot(self.cache.as_ref())
    }

    /// Persists a record and mirrors its short-lived tokens into the cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error. Cache failures are logged only.
    #[instrument(skip(self, record), fields(authorization_id = %record.id))]
    pub async fn save(&self, record: &TokenRecord) -> IamResult<()> {
        self.storage.save(record).await?;

        let now = OffsetDateTime::now_utc();
        let mut stale = Vec::new();
        for kind in CACHED_KINDS {
            let key = self.cache_key(kind, &record.id);
            match record.token(kind) {
                Some(token) if !token.is_expired_at(now) => {
                    self.mirror(&key, token, now).await;
                }
                _ => stale.push(key),
            }
        }
        if !stale.is_empty() {
            self.invalidator.invalidate(&stale).await;
        }

        tracing::debug!(
            client_id = %record.client_id,
            grant_type = %record.authorization_grant_type,
            "authorization saved"
        );
        Ok(())
    }

    /// Record by id, unless every token it holds has expired.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_by_id(&self, id: &str) -> IamResult<Option<TokenRecord>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .storage
            .find_by_id(id)
            .await?
            .filter(|r| !r.is_fully_expired_at(now)))
    }

    /// Record holding this refresh token, unless it has expired.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_by_refresh_token_value(&self, value: &str) -> IamResult<Option<TokenRecord>> {
        self.find_live_by_value(TokenKind::RefreshToken, value).await
    }

    /// Record holding this authorization code, unless it has expired.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_by_authorization_code_value(
        &self,
        value: &str,
    ) -> IamResult<Option<TokenRecord>> {
        self.find_live_by_value(TokenKind::AuthorizationCode, value).await
    }

    /// Record holding this access token, unless it has expired.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_by_access_token_value(&self, value: &str) -> IamResult<Option<TokenRecord>> {
        self.find_live_by_value(TokenKind::AccessToken, value).await
    }

    /// Live authorization code of a record, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_authorization_code(&self, authorization_id: &str) -> IamResult<Option<TokenValue>> {
        self.find_cached_token(TokenKind::AuthorizationCode, authorization_id)
            .await
    }

    /// Live ID token of a record, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn find_oidc_id_token(&self, authorization_id: &str) -> IamResult<Option<TokenValue>> {
        self.find_cached_token(TokenKind::OidcIdToken, authorization_id)
            .await
    }

    /// Replaces the access token (and optionally the refresh token) of a
    /// record on refresh.
    ///
    /// # Errors
    ///
    /// Returns `IamError::TokenNotFound` if the record does not exist or all
    /// of its tokens have expired, or a storage error.
    #[instrument(skip(self, access_token, refresh_token))]
    pub async fn rotate(
        &self,
        authorization_id: &str,
        access_token: TokenValue,
        refresh_token: Option<TokenValue>,
    ) -> IamResult<TokenRecord> {
        let mut record = self
            .find_by_id(authorization_id)
            .await?
            .ok_or_else(|| IamError::TokenNotFound {
                id: authorization_id.to_string(),
            })?;

        record.access_token = Some(access_token);
        if let Some(refresh_token) = refresh_token {
            record.refresh_token = Some(refresh_token);
        }
        self.storage.save(&record).await?;

        tracing::info!(authorization_id = %record.id, "authorization tokens rotated");
        Ok(record)
    }

    /// Deletes a record (logout). Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[instrument(skip(self))]
    pub async fn revoke(&self, authorization_id: &str) -> IamResult<bool> {
        let removed = self.storage.delete(authorization_id).await?;
        self.invalidator
            .invalidate(&self.keys_for(std::slice::from_ref(&authorization_id.to_string())))
            .await;

        if removed {
            tracing::info!(authorization_id = %authorization_id, "authorization revoked");
        }
        Ok(removed)
    }

    /// Deletes every record of a principal. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[instrument(skip(self))]
    pub async fn revoke_by_principal(&self, principal_name: &str) -> IamResult<usize> {
        let ids = self.storage.delete_by_principal(principal_name).await?;
        self.invalidator.invalidate(&self.keys_for(&ids)).await;

        tracing::info!(principal = %principal_name, count = ids.len(), "authorizations revoked");
        Ok(ids.len())
    }

    /// Deletes every record whose tokens have all expired.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn remove_expired(&self) -> IamResult<usize> {
        let ids = self
            .storage
            .delete_expired(OffsetDateTime::now_utc())
            .await?;
        if !ids.is_empty() {
            self.invalidator.invalidate(&self.keys_for(&ids)).await;
            tracing::info!(count = ids.len(), "expired authorizations removed");
        }
        Ok(ids.len())
    }

    /// Returns `true` only for a well-formed, correctly signed, unexpired
    /// access token that is still the current access token of its
    /// authorization record.
    ///
    /// Never fails and never says why a token was rejected.
    pub async fn validity(&self, token: &str) -> bool {
        match self.check_validity(token).await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "token validity check failed closed");
                false
            }
        }
    }

    async fn check_validity(&self, token: &str) -> IamResult<bool> {
        if token.is_empty() {
            return Ok(false);
        }
        let Ok(claims) = self.validator.decode(token) else {
            return Ok(false);
        };
        let Some(record) = self.storage.find_by_id(&claims.authorization_id).await? else {
            return Ok(false);
        };

        Ok(record
            .access_token
            .as_ref()
            .is_some_and(|access| access.value == token && !access.is_expired()))
    }

    async fn find_live_by_value(
        &self,
        kind: TokenKind,
        value: &str,
    ) -> IamResult<Option<TokenRecord>> {
        let record = self.storage.find_by_token_value(kind, value).await?;
        Ok(record.filter(|r| r.token(kind).is_some_and(|t| !t.is_expired())))
    }

    async fn find_cached_token(
        &self,
        kind: TokenKind,
        authorization_id: &str,
    ) -> IamResult<Option<TokenValue>> {
        let key = self.cache_key(kind, authorization_id);
        let now = OffsetDateTime::now_utc();

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<TokenValue>(&bytes) {
                Ok(token) if !token.is_expired_at(now) => {
                    self.counters.hit();
                    return Ok(Some(token));
                }
                Ok(_) => self.counters.miss(),
                Err(e) => {
                    self.counters.error();
                    self.counters.miss();
                    tracing::warn!(key = %key, error = %e, "cache decode failed, treating as miss");
                }
            },
            Ok(None) => self.counters.miss(),
            Err(e) => {
                self.counters.error();
                self.counters.miss();
                tracing::warn!(key = %key, error = %e, "cache unavailable, treating as miss");
            }
        }

        let generation = self.invalidator.generation();
        let token = self
            .storage
            .find_by_id(authorization_id)
            .await?
            .and_then(|record| record.token(kind).cloned())
            .filter(|token| !token.is_expired_at(now));
        if let Some(token) = &token
            && self.invalidator.is_current(generation)
        {
            self.mirror(&key, token, now).await;
            // A revoke may have landed between the check and the mirror.
            if !self.invalidator.is_current(generation) {
                self.invalidator.invalidate(std::slice::from_ref(&key)).await;
            }
        }
        Ok(token)
    }

    async fn mirror(&self, key: &str, token: &TokenValue, now: OffsetDateTime) {
        let ttl = token
            .remaining_at(now)
            .map_or(self.ttl, |left| left.min(self.ttl));
        if ttl.is_zero() {
            return;
        }

        let payload = match serde_json::to_vec(token) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.error();
                tracing::warn!(key = %key, error = %e, "cache encode failed");
                return;
            }
        };
        if let Err(e) = self.cache.put(key, payload, ttl).await {
            self.counters.error();
            tracing::warn!(key = %key, error = %e, "cache put failed");
        }
    }

    fn keys_for(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .flat_map(|id| CACHED_KINDS.iter().map(move |kind| (kind, id)))
            .map(|(kind, id)| self.cache_key(*kind, id))
            .collect()
    }
}
