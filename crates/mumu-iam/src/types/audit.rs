//! Audit metadata embedded in every authority entity.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Who created and last changed an entity, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    /// Account that created the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founder_id: Option<i64>,

    /// Account that last modified the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier_id: Option<i64>,

    /// When the entity was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the entity was last modified.
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,

    /// When the entity was archived (None while active).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub archived_at: Option<OffsetDateTime>,
}

impl AuditMetadata {
    /// Creates metadata stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(OffsetDateTime::now_utc())
    }

    /// Creates metadata stamped with the given time.
    #[must_use]
    pub fn at(timestamp: OffsetDateTime) -> Self {
        Self {
            founder_id: None,
            modifier_id: None,
            created_at: timestamp,
            modified_at: timestamp,
            archived_at: None,
        }
    }

    /// Sets the founder, who is also the first modifier.
    #[must_use]
    pub fn founded_by(mut self, account_id: i64) -> Self {
        self.founder_id = Some(account_id);
        self.modifier_id = Some(account_id);
        self
    }

    /// Records a modification.
    pub fn touch(&mut self, modifier_id: Option<i64>, timestamp: OffsetDateTime) {
        if modifier_id.is_some() {
            self.modifier_id = modifier_id;
        }
        self.modified_at = timestamp;
    }
}

impl Default for AuditMetadata {
    fn default() -> Self {
        Self::now()
    }
}
