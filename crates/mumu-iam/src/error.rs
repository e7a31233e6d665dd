//! IAM error types.
//!
//! Business outcomes (`NotFound`, `DuplicateCode`, `Cycle`, ...) are surfaced
//! to callers as typed variants so they can branch on the result kind.
//! Cache failures never appear here: the cache layer recovers them locally and
//! treats them as misses. Store failures propagate unmodified.

use std::fmt;

use crate::types::AuthorityKind;

/// Errors returned by the IAM gateways and storage traits.
#[derive(Debug, thiserror::Error)]
pub enum IamError {
    /// The entity is absent, or archived when an active one was required.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        kind: AuthorityKind,
        /// Identifier (id or code) used for the lookup.
        id: String,
    },

    /// The authorization record does not exist.
    #[error("authorization not found: {id}")]
    TokenNotFound {
        /// Authorization id.
        id: String,
    },

    /// Another active entity of the same kind already uses this code.
    #[error("{kind} code already exists: {code}")]
    DuplicateCode {
        /// Kind of entity.
        kind: AuthorityKind,
        /// The conflicting code.
        code: String,
    },

    /// An entity with the requested id already exists.
    #[error("{kind} id already exists: {id}")]
    DuplicateId {
        /// Kind of entity.
        kind: AuthorityKind,
        /// The conflicting id.
        id: i64,
    },

    /// Adding the edge would introduce a cycle into the hierarchy.
    #[error("{kind} hierarchy cycle: {ancestor_id} cannot become an ancestor of {descendant_id}")]
    Cycle {
        /// Kind of entity.
        kind: AuthorityKind,
        /// Requested ancestor.
        ancestor_id: i64,
        /// Requested descendant.
        descendant_id: i64,
    },

    /// The direct edge already exists.
    #[error("{kind} path already exists: {ancestor_id} -> {descendant_id}")]
    PathAlreadyExists {
        /// Kind of entity.
        kind: AuthorityKind,
        /// Ancestor end of the edge.
        ancestor_id: i64,
        /// Descendant end of the edge.
        descendant_id: i64,
    },

    /// The direct edge does not exist.
    #[error("{kind} path not found: {ancestor_id} -> {descendant_id}")]
    PathNotFound {
        /// Kind of entity.
        kind: AuthorityKind,
        /// Ancestor end of the edge.
        ancestor_id: i64,
        /// Descendant end of the edge.
        descendant_id: i64,
    },

    /// The entity is referenced by other active entities and cannot be
    /// archived or deleted.
    #[error("{kind} {id} is in use by: {}", used_by.join(", "))]
    InUse {
        /// Kind of entity.
        kind: AuthorityKind,
        /// The referenced entity.
        id: i64,
        /// Codes of the referencing entities.
        used_by: Vec<String>,
    },

    /// The input failed validation.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the validation failure.
        message: String,
    },

    /// A bounded operation exceeded its time budget. Safe to retry.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
    },

    /// The store of record failed. No fallback exists for the request.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the storage failure.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl IamError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: AuthorityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates a new `DuplicateCode` error.
    #[must_use]
    pub fn duplicate_code(kind: AuthorityKind, code: impl Into<String>) -> Self {
        Self::DuplicateCode {
            kind,
            code: code.into(),
        }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::TokenNotFound { .. })
    }

    /// Returns `true` if this is a `DuplicateCode` error.
    #[must_use]
    pub fn is_duplicate_code(&self) -> bool {
        matches!(self, Self::DuplicateCode { .. })
    }

    /// Returns `true` if this is a `Cycle` error.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }

    /// Returns `true` if the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::TokenNotFound { .. }
                | Self::DuplicateCode { .. }
                | Self::DuplicateId { .. }
                | Self::Cycle { .. }
                | Self::PathAlreadyExists { .. }
                | Self::PathNotFound { .. }
                | Self::InUse { .. }
                | Self::InvalidInput { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::StoreUnavailable { .. } | Self::Configuration { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::TokenNotFound { .. } => ErrorCategory::NotFound,
            Self::DuplicateCode { .. } | Self::DuplicateId { .. } | Self::InUse { .. } => {
                ErrorCategory::Conflict
            }
            Self::Cycle { .. } | Self::PathAlreadyExists { .. } | Self::PathNotFound { .. } => {
                ErrorCategory::Hierarchy
            }
            Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::Timeout { .. } | Self::StoreUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

/// Result type for IAM operations.
pub type IamResult<T> = Result<T, IamError>;

/// Categories of IAM errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lookups that found nothing.
    NotFound,
    /// Uniqueness or usage conflicts.
    Conflict,
    /// Hierarchy edge violations.
    Hierarchy,
    /// Request validation errors.
    Validation,
    /// Storage and timeout failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Hierarchy => write!(f, "hierarchy"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Errors raised by cache backends.
///
/// These never leave the cache layer: callers log them and fall back to the
/// store of record.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backend could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A cache command failed.
    #[error("Cache command failed: {0}")]
    Command(String),

    /// A cached payload could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;
