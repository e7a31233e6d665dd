//! The authority abstraction shared by roles and permissions.
//!
//! Roles and permissions are both flat, code-addressed entities arranged in a
//! closure-table hierarchy. [`Authority`] captures what the gateways, caches
//! and storage backends need from either of them.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{IamError, IamResult};
use crate::types::AuditMetadata;

/// Maximum length of an authority code, in characters.
pub const MAX_CODE_LENGTH: usize = 100;

/// The kind of authority entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityKind {
    /// A role.
    Role,
    /// A permission.
    Permission,
}

impl AuthorityKind {
    /// Returns the lowercase name used in cache keys and log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Permission => "permission",
        }
    }

    /// Returns a stable numeric key used to serialize hierarchy mutations
    /// of this kind (e.g. as a database advisory lock id).
    #[must_use]
    pub fn lock_key(&self) -> i64 {
        match self {
            Self::Role => 0x6d75_6d75_0001,
            Self::Permission => 0x6d75_6d75_0002,
        }
    }
}

impl fmt::Display for AuthorityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hierarchical, code-addressed entity with soft-archive semantics.
pub trait Authority:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind of this entity.
    const KIND: AuthorityKind;

    /// Partial update applied by `update_by_id`.
    type Patch: fmt::Debug + Send + Sync + 'static;

    /// Returns the identifier (0 until assigned).
    fn id(&self) -> i64;

    /// Assigns the identifier.
    fn set_id(&mut self, id: i64);

    /// Returns the unique code.
    fn code(&self) -> &str;

    /// Returns the display name.
    fn name(&self) -> &str;

    /// Returns `true` if the entity is archived.
    fn is_archived(&self) -> bool;

    /// Sets the archived flag.
    fn set_archived(&mut self, archived: bool);

    /// Returns `true` if the entity is the ancestor of at least one other.
    fn has_descendant(&self) -> bool;

    /// Sets the derived descendant flag.
    fn set_has_descendant(&mut self, has_descendant: bool);

    /// Returns the audit metadata.
    fn audit(&self) -> &AuditMetadata;

    /// Returns the audit metadata mutably.
    fn audit_mut(&mut self) -> &mut AuditMetadata;

    /// Applies a partial update.
    fn apply(&mut self, patch: Self::Patch, at: OffsetDateTime);

    /// Ids of entities of another kind that this entity references.
    ///
    /// Roles reference their permissions. Used by usage guards.
    fn references(&self) -> Vec<i64> {
        Vec::new()
    }

    /// Validates the entity before it is written.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if the code is empty or longer than
    /// [`MAX_CODE_LENGTH`] characters, or if the name is empty.
    fn validate(&self) -> IamResult<()> {
        let code = self.code();
        if code.trim().is_empty() {
            return Err(IamError::invalid_input(format!(
                "{} code must not be empty",
                Self::KIND
            )));
        }
        if code.chars().count() > MAX_CODE_LENGTH {
            return Err(IamError::invalid_input(format!(
                "{} code must be at most {MAX_CODE_LENGTH} characters",
                Self::KIND
            )));
        }
        if self.name().trim().is_empty() {
            return Err(IamError::invalid_input(format!(
                "{} name must not be empty",
                Self::KIND
            )));
        }
        Ok(())
    }

    /// Marks the entity archived at the given time.
    fn archive(&mut self, at: OffsetDateTime) {
        self.set_archived(true);
        let audit = self.audit_mut();
        audit.archived_at = Some(at);
        audit.modified_at = at;
    }

    /// Clears the archived state at the given time.
    fn recover(&mut self, at: OffsetDateTime) {
        self.set_archived(false);
        let audit = self.audit_mut();
        audit.archived_at = None;
        audit.modified_at = at;
    }
}

/// Optional listing filter.
///
/// `code` matches exactly, `name` matches a case-insensitive substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityFilter {
    /// Exact code.
    pub code: Option<String>,
    /// Case-insensitive name fragment.
    pub name: Option<String>,
}

impl AuthorityFilter {
    /// Creates an empty filter that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to an exact code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Restricts the filter to names containing the fragment.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns `true` if the entity passes the filter.
    #[must_use]
    pub fn matches<E: Authority>(&self, entity: &E) -> bool {
        if let Some(code) = &self.code
            && entity.code() != code
        {
            return false;
        }
        if let Some(name) = &self.name
            && !entity.name().to_lowercase().contains(&name.to_lowercase())
        {
            return false;
        }
        true
    }
}

/// One row of the closure table.
///
/// `depth` is the length of the shortest path from ancestor to descendant;
/// depth 1 is a direct edge. Self rows are not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityPath {
    /// The ancestor end.
    pub ancestor_id: i64,
    /// The descendant end.
    pub descendant_id: i64,
    /// Shortest path length.
    pub depth: i32,
}

impl AuthorityPath {
    /// Creates a closure row.
    #[must_use]
    pub fn new(ancestor_id: i64, descendant_id: i64, depth: i32) -> Self {
        Self {
            ancestor_id,
            descendant_id,
            depth,
        }
    }

    /// Creates a direct edge.
    #[must_use]
    pub fn direct(ancestor_id: i64, descendant_id: i64) -> Self {
        Self::new(ancestor_id, descendant_id, 1)
    }

    /// Returns `true` if this row is a direct edge.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.depth == 1
    }

    /// Returns the `(ancestor, descendant)` pair.
    #[must_use]
    pub fn pair(&self) -> (i64, i64) {
        (self.ancestor_id, self.descendant_id)
    }
}
