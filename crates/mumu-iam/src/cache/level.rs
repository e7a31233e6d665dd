//! TTL tiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named expiry class of a cache record.
///
/// The durations come from [`crate::config::CacheTtlConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    /// Short-lived, security-sensitive data (minutes).
    High,
    /// Ordinary entity snapshots (tens of minutes).
    #[default]
    Medium,
    /// Slowly-changing reference data (hours).
    Low,
}

impl CacheLevel {
    /// Returns the lowercase tier name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
