//! In-memory authorization record storage.

use async_trait::async_trait;
use dashmap::DashMap;
use mumu_iam::IamResult;
use mumu_iam::storage::TokenStorage;
use mumu_iam::types::{TokenKind, TokenRecord};
use time::OffsetDateTime;

/// Authorization records keyed by id.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    records: DashMap<String, TokenRecord>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn remove_where(&self, mut pred: impl FnMut(&TokenRecord) -> bool) -> Vec<String> {
        let ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        ids.into_iter()
            .filter(|id| self.records.remove(id).is_some())
            .collect()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn save(&self, record: &TokenRecord) -> IamResult<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> IamResult<Option<TokenRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn find_by_token_value(
        &self,
        kind: TokenKind,
        value: &str,
    ) -> IamResult<Option<TokenRecord>> {
        Ok(self
            .records
            .iter()
            .find(|entry| entry.value().holds(kind, value))
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> IamResult<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn delete_by_principal(&self, principal_name: &str) -> IamResult<Vec<String>> {
        Ok(self.remove_where(|r| r.principal_name == principal_name))
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> IamResult<Vec<String>> {
        let ids = self.remove_where(|r| r.is_fully_expired_at(now));
        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "expired authorization records removed");
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mumu_iam::types::{AuthorizationGrantType, TokenValue};
    use std::time::Duration;

    fn record(principal: &str) -> TokenRecord {
        TokenRecord::new("web", principal, AuthorizationGrantType::AuthorizationCode)
    }

    #[tokio::test]
    async fn test_find_by_token_value() {
        let storage = MemoryTokenStorage::new();
        let rec = record("alice").with_token(
            TokenKind::RefreshToken,
            TokenValue::issue("refresh-1", Duration::from_secs(60)),
        );
        storage.save(&rec).await.unwrap();

        let found = storage
            .find_by_token_value(TokenKind::RefreshToken, "refresh-1")
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some(rec.id));
        assert!(
            storage
                .find_by_token_value(TokenKind::AccessToken, "refresh-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_by_principal_and_expired() {
        let storage = MemoryTokenStorage::new();
        let live = record("alice").with_token(
            TokenKind::AccessToken,
            TokenValue::issue("a", Duration::from_secs(3600)),
        );
        let other = record("bob").with_token(
            TokenKind::AccessToken,
            TokenValue::issue("b", Duration::from_secs(3600)),
        );
        let empty = record("carol");
        for rec in [&live, &other, &empty] {
            storage.save(rec).await.unwrap();
        }

        let expired = storage.delete_expired(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(expired, vec![empty.id.clone()]);

        let removed = storage.delete_by_principal("alice").await.unwrap();
        assert_eq!(removed, vec![live.id.clone()]);
        assert_eq!(storage.len(), 1);
        assert!(!storage.delete(&live.id).await.unwrap());
        assert!(storage.delete(&other.id).await.unwrap());
        assert!(storage.is_empty());
    }
}
