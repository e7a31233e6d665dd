//! Guards against archiving or deleting entities that are still referenced.

use std::sync::Arc;

use async_trait::async_trait;

use crate::IamResult;
use crate::storage::AuthorityStorage;
use crate::types::{Authority, Role};

/// Reports which active entities still reference an id.
#[async_trait]
pub trait UsageGuard: Send + Sync {
    /// Codes of the active entities referencing `id`. Empty if unused.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn in_use_by(&self, id: i64) -> IamResult<Vec<String>>;
}

/// A permission is in use while an active role grants it.
pub struct RoleUsageGuard {
    roles: Arc<dyn AuthorityStorage<Role>>,
}

impl RoleUsageGuard {
    /// Creates a guard over the role store.
    pub fn new(roles: Arc<dyn AuthorityStorage<Role>>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl UsageGuard for RoleUsageGuard {
    async fn in_use_by(&self, id: i64) -> IamResult<Vec<String>> {
        let roles = self.roles.find_referencing(id).await?;
        Ok(roles.iter().map(|role| role.code().to_string()).collect())
    }
}
