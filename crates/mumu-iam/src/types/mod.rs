//! Domain types shared by the gateways and storage backends.
//!
//! ## Domain Types
//!
//! - [`Role`] / [`Permission`] - hierarchical authority entities
//! - [`AuthorityPath`] - one closure-table row
//! - [`TokenRecord`] - persisted OAuth 2.0 authorization
//! - [`Page`] / [`Slice`] - paged listings

pub mod audit;
pub mod authority;
pub mod page;
pub mod permission;
pub mod role;
pub mod token;

pub use audit::AuditMetadata;
pub use authority::{Authority, AuthorityFilter, AuthorityKind, AuthorityPath, MAX_CODE_LENGTH};
pub use page::{MAX_PAGE_SIZE, Page, PageRequest, Slice};
pub use permission::{Permission, PermissionPatch};
pub use role::{Role, RoleBuilder, RolePatch};
pub use token::{AuthorizationGrantType, TokenKind, TokenRecord, TokenValue};
