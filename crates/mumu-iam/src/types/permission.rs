//! Permission entity.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{AuditMetadata, Authority, AuthorityKind};

/// A permission in the authorization system.
///
/// Permissions form a hierarchy: holding an ancestor implies holding every
/// descendant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Unique identifier (0 until the store assigns one).
    pub id: i64,

    /// Unique code among active permissions.
    pub code: String,

    /// Display name.
    pub name: String,

    /// What the permission allows.
    #[serde(default)]
    pub description: String,

    /// Soft-delete flag.
    #[serde(default)]
    pub archived: bool,

    /// Derived: `true` when the permission has at least one descendant.
    #[serde(default)]
    pub has_descendant: bool,

    /// Creation and modification metadata.
    pub audit: AuditMetadata,
}

impl Permission {
    /// Creates an active permission with a store-allocated id.
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            code: code.into(),
            name: name.into(),
            description: String::new(),
            archived: false,
            has_descendant: false,
            audit: AuditMetadata::now(),
        }
    }

    /// Sets a caller-chosen id.
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the audit metadata.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditMetadata) -> Self {
        self.audit = audit;
        self
    }
}

/// Partial update for a [`Permission`].
#[derive(Debug, Clone, Default)]
pub struct PermissionPatch {
    /// New code.
    pub code: Option<String>,
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Account performing the update.
    pub modifier_id: Option<i64>,
}

impl Authority for Permission {
    const KIND: AuthorityKind = AuthorityKind::Permission;
    type Patch = PermissionPatch;

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

    fn apply(&mut self, patch: PermissionPatch, at: OffsetDateTime) {
        if let Some(code) = patch.code {
            self.code = code;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        self.audit.touch(patch.modifier_id, at);
    }
}
