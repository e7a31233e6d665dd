//! Role entity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{AuditMetadata, Authority, AuthorityKind};

// =============================================================================
// Role Type
// =============================================================================

/// A role in the authorization system.
///
/// Roles group permissions and form their own hierarchy: a role inherits the
/// permissions of every descendant role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Unique identifier (0 until the store assigns one).
    pub id: i64,

    /// Unique code among active roles (e.g. "ADMIN").
    pub code: String,

    /// Display name.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Ids of the permissions granted by this role.
    #[serde(default)]
    pub permissions: BTreeSet<i64>,

    /// Soft-delete flag.
    #[serde(default)]
    pub archived: bool,

    /// Derived: `true` when the role has at least one descendant.
    #[serde(default)]
    pub has_descendant: bool,

    /// Creation and modification metadata.
    pub audit: AuditMetadata,
}

impl Role {
    /// Creates an active role with no permissions and a store-allocated id.
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            code: code.into(),
            name: name.into(),
            description: String::new(),
            permissions: BTreeSet::new(),
            archived: false,
            has_descendant: false,
            audit: AuditMetadata::now(),
        }
    }

    /// Creates a new role builder.
    #[must_use]
    pub fn builder(code: impl Into<String>, name: impl Into<String>) -> RoleBuilder {
        RoleBuilder::new(code, name)
    }

    /// Returns `true` if the role grants the permission.
    #[must_use]
    pub fn has_permission(&self, permission_id: i64) -> bool {
        self.permissions.contains(&permission_id)
    }
}

// =============================================================================
// Role Builder
// =============================================================================

/// Builder for creating `Role` instances.
pub struct RoleBuilder {
    role: Role,
}

impl RoleBuilder {
    fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Role::new(code, name),
        }
    }

    /// Sets a caller-chosen id.
    #[must_use]
    pub fn id(mut self, id: i64) -> Self {
        self.role.id = id;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.role.description = description.into();
        self
    }

    /// Adds a permission to the role.
    #[must_use]
    pub fn add_permission(mut self, permission_id: i64) -> Self {
        self.role.permissions.insert(permission_id);
        self
    }

    /// Sets the founding account.
    #[must_use]
    pub fn founder(mut self, account_id: i64) -> Self {
        self.role.audit = self.role.audit.founded_by(account_id);
        self
    }

    /// Builds the role.
    #[must_use]
    pub fn build(self) -> Role {
        self.role
    }
}

/// Partial update for a [`Role`].
#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    /// New code.
    pub code: Option<String>,
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement permission set.
    pub permissions: Option<BTreeSet<i64>>,
    /// Account performing the update.
    pub modifier_id: Option<i64>,
}

impl Authority for Role {
    const KIND: AuthorityKind = AuthorityKind::Role;
    type Patch = RolePatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn code(&self) -> &str {
        &self.code
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_archived(&self) -> bool {
        self.archived
    }

    fn set_archived(&mut self, archived: bool) {
        self.archived = archived;
    }

    fn has_descendant(&self) -> bool {
        self.has_descendant
    }

    fn set_has_descendant(&mut self, has_descendant: bool) {
        self.has_descendant = has_descendant;
    }

    fn audit(&self) -> &AuditMetadata {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditMetadata {
        &mut self.audit
    }

    fn apply(&mut self, patch: RolePatch, at: OffsetDateTime) {
        if let Some(code) = patch.code {
            self.code = code;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(permissions) = patch.permissions {
            self.permissions = permissions;
        }
        self.audit.touch(patch.modifier_id, at);
    }

    fn references(&self) -> Vec<i64> {
        self.permissions.iter().copied().collect()
    }
}
