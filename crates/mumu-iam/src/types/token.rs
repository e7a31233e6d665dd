//! OAuth 2.0 authorization record types.
//!
//! A [`TokenRecord`] is created when a grant is issued and carries up to four
//! token values, each with its own issue and expiry instants. Expired and
//! revoked records are indistinguishable from absent ones to callers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// OAuth 2.0 grant type that produced an authorization record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationGrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Client Credentials flow.
    ClientCredentials,
    /// Refresh Token flow.
    RefreshToken,
    /// Device Authorization flow.
    DeviceCode,
    /// Token Exchange.
    TokenExchange,
    /// Resource Owner Password Credentials flow.
    Password,
}

impl AuthorizationGrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
            Self::Password => "password",
        }
    }

    /// Parses a grant_type parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            "urn:ietf:params:oauth:grant-type:device_code" => Some(Self::DeviceCode),
            "urn:ietf:params:oauth:grant-type:token-exchange" => Some(Self::TokenExchange),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthorizationGrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The four token slots of an authorization record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Authorization code.
    AuthorizationCode,
    /// Access token.
    AccessToken,
    /// Refresh token.
    RefreshToken,
    /// OpenID Connect ID token.
    OidcIdToken,
}

impl TokenKind {
    /// Returns the name used in cache keys and storage columns.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::OidcIdToken => "oidc_id_token",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single token value with its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValue {
    /// Opaque token value.
    pub value: String,

    /// When the token was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// When the token expires (None = no expiration).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl TokenValue {
    /// Creates a token value issued now and expiring after `lifetime`.
    #[must_use]
    pub fn issue(value: impl Into<String>, lifetime: std::time::Duration) -> Self {
        let issued_at = OffsetDateTime::now_utc();
        Self {
            value: value.into(),
            issued_at,
            expires_at: Some(issued_at + lifetime),
        }
    }

    /// Creates a token value with explicit instants.
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        issued_at: OffsetDateTime,
        expires_at: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            value: value.into(),
            issued_at,
            expires_at,
        }
    }

    /// Returns `true` if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Returns `true` if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Remaining lifetime at `now`; `None` if unbounded, zero if expired.
    #[must_use]
    pub fn remaining_at(&self, now: OffsetDateTime) -> Option<std::time::Duration> {
        self.expires_at.map(|exp| {
            let left = exp - now;
            if left.is_positive() {
                left.unsigned_abs()
            } else {
                std::time::Duration::ZERO
            }
        })
    }

    /// Generate a cryptographically secure random token value.
    ///
    /// Returns a 256-bit random value encoded as base64url (43 characters).
    #[must_use]
    pub fn generate() -> String {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// A persisted OAuth 2.0 authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Unique identifier of the authorization.
    pub id: String,

    /// Client the authorization was granted to.
    pub client_id: String,

    /// Principal (account) that authorized the client.
    pub principal_name: String,

    /// Grant that produced the authorization.
    pub authorization_grant_type: AuthorizationGrantType,

    /// Authorization code, for the authorization code flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<TokenValue>,

    /// Access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<TokenValue>,

    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<TokenValue>,

    /// OpenID Connect ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_id_token: Option<TokenValue>,
}

impl TokenRecord {
    /// Creates an empty authorization with a random id.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        principal_name: impl Into<String>,
        grant_type: AuthorizationGrantType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            principal_name: principal_name.into(),
            authorization_grant_type: grant_type,
            authorization_code: None,
            access_token: None,
            refresh_token: None,
            oidc_id_token: None,
        }
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the token in the given slot.
    #[must_use]
    pub fn with_token(mut self, kind: TokenKind, token: TokenValue) -> Self {
        *self.slot_mut(kind) = Some(token);
        self
    }

    /// Returns the token in the given slot.
    #[must_use]
    pub fn token(&self, kind: TokenKind) -> Option<&TokenValue> {
        match kind {
            TokenKind::AuthorizationCode => self.authorization_code.as_ref(),
            TokenKind::AccessToken => self.access_token.as_ref(),
            TokenKind::RefreshToken => self.refresh_token.as_ref(),
            TokenKind::OidcIdToken => self.oidc_id_token.as_ref(),
        }
    }

    /// Returns the given slot mutably.
    pub fn slot_mut(&mut self, kind: TokenKind) -> &mut Option<TokenValue> {
        match kind {
            TokenKind::AuthorizationCode => &mut self.authorization_code,
            TokenKind::AccessToken => &mut self.access_token,
            TokenKind::RefreshToken => &mut self.refresh_token,
            TokenKind::OidcIdToken => &mut self.oidc_id_token,
        }
    }

    /// Returns `true` if the slot holds exactly this value.
    #[must_use]
    pub fn holds(&self, kind: TokenKind, value: &str) -> bool {
        self.token(kind).is_some_and(|t| t.value == value)
    }

    /// Returns `true` if every present token has expired at `now`.
    ///
    /// A record with no tokens at all is considered expired.
    #[must_use]
    pub fn is_fully_expired_at(&self, now: OffsetDateTime) -> bool {
        [
            TokenKind::AuthorizationCode,
            TokenKind::AccessToken,
            TokenKind::RefreshToken,
            TokenKind::OidcIdToken,
        ]
        .iter()
        .filter_map(|kind| self.token(*kind))
        .all(|token| token.is_expired_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_grant_type_round_trip_names() {
        for grant in [
            AuthorizationGrantType::AuthorizationCode,
            AuthorizationGrantType::ClientCredentials,
            AuthorizationGrantType::RefreshToken,
            AuthorizationGrantType::DeviceCode,
            AuthorizationGrantType::TokenExchange,
            AuthorizationGrantType::Password,
        ] {
            assert_eq!(AuthorizationGrantType::parse(grant.as_str()), Some(grant));
        }
        assert_eq!(AuthorizationGrantType::parse("implicit"), None);
    }

    #[test]
    fn test_generate_token() {
        let token = TokenValue::generate();

        // 32 bytes base64url encoded = 43 characters
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, TokenValue::generate());
    }

    #[test]
    fn test_expiry_and_remaining() {
        let now = OffsetDateTime::now_utc();

        let unbounded = TokenValue::new("a", now, None);
        assert!(!unbounded.is_expired_at(now));
        assert_eq!(unbounded.remaining_at(now), None);

        let live = TokenValue::new("b", now, Some(now + Duration::minutes(5)));
        assert!(!live.is_expired_at(now));
        assert_eq!(
            live.remaining_at(now),
            Some(std::time::Duration::from_secs(300))
        );

        let expired = TokenValue::new("c", now, Some(now - Duration::seconds(1)));
        assert!(expired.is_expired_at(now));
        assert_eq!(expired.remaining_at(now), Some(std::time::Duration::ZERO));
    }

    #[test]
    fn test_record_slots() {
        let now = OffsetDateTime::now_utc();
        let record = TokenRecord::new("web", "alice", AuthorizationGrantType::AuthorizationCode)
            .with_token(
                TokenKind::RefreshToken,
                TokenValue::new("rt-123", now, Some(now + Duration::hours(1))),
            )
            .with_token(
                TokenKind::AccessToken,
                TokenValue::new("at-1", now, Some(now - Duration::minutes(1))),
            );

        assert!(record.holds(TokenKind::RefreshToken, "rt-123"));
        assert!(!record.holds(TokenKind::AccessToken, "rt-123"));
        assert!(record.token(TokenKind::OidcIdToken).is_none());
        assert!(!record.is_fully_expired_at(now));
        assert!(record.is_fully_expired_at(now + Duration::hours(2)));
    }
}
