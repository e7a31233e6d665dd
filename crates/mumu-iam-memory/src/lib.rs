//! In-memory storage backend for MuMu IAM.
//!
//! Implements the `mumu-iam` storage traits without external services. Each
//! authority kind keeps its committed state behind a snapshot; write
//! transactions are serialized per kind, work on a private copy and publish it
//! on commit. Readers never block on an open transaction.
//!
//! # Example
//!
//! ```ignore
//! use mumu_iam_memory::MemoryIamStorage;
//!
//! let storage = MemoryIamStorage::new();
//! let roles = storage.roles();
//! let tokens = storage.tokens();
//! ```

pub mod authority;
pub mod token;

use std::sync::Arc;

use mumu_iam::storage::{AuthorityStorage, TokenStorage};
use mumu_iam::types::{Permission, Role};

pub use authority::MemoryAuthorityStorage;
pub use token::MemoryTokenStorage;

/// Role, permission and token stores sharing one lifetime.
#[derive(Debug, Clone, Default)]
pub struct MemoryIamStorage {
    roles: Arc<MemoryAuthorityStorage<Role>>,
    permissions: Arc<MemoryAuthorityStorage<Permission>>,
    tokens: Arc<MemoryTokenStorage>,
}

impl MemoryIamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role storage.
    pub fn roles(&self) -> Arc<dyn AuthorityStorage<Role>> {
        self.roles.clone()
    }

    /// Permission storage.
    pub fn permissions(&self) -> Arc<dyn AuthorityStorage<Permission>> {
        self.permissions.clone()
    }

    /// Authorization record storage.
    pub fn tokens(&self) -> Arc<dyn TokenStorage> {
        self.tokens.clone()
    }
}
