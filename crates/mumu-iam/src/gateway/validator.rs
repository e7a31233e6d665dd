//! Access-token signature and claim validation.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, TokenConfig};

/// Claims carried by an access token issued for an authorization record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Principal the token was issued to.
    pub sub: String,

    /// Expiration (seconds since the epoch).
    pub exp: i64,

    /// Issued-at (seconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Id of the authorization record the token belongs to.
    pub authorization_id: String,

    /// Grant that produced the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
}

/// Verifies HS256-signed access tokens.
#[derive(Clone)]
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    /// Creates a validator for tokens signed with `secret`.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Creates a validator from the token configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no validation secret is configured.
    pub fn from_config(config: &TokenConfig) -> Result<Self, ConfigError> {
        let secret = config
            .validation_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Missing("token.validation_secret".to_string()))?;

        let mut validator = Self::hs256(secret.as_bytes()).with_leeway(config.leeway_secs);
        if let Some(issuer) = &config.issuer {
            validator = validator.with_issuer(issuer);
        }
        Ok(validator)
    }

    /// Requires the `iss` claim to match.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    /// Decodes and validates a token.
    ///
    /// # Errors
    ///
    /// Returns the decoding error for a malformed, mis-signed or expired
    /// token.
    pub fn decode(&self, token: &str) -> Result<AccessTokenClaims, jsonwebtoken::errors::Error> {
        decode::<AccessTokenClaims>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}
