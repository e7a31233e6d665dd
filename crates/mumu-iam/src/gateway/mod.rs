//! Public operations over roles, permissions and authorization records.
//!
//! [`AuthorityGateway`] is the write path and read path for roles and
//! permissions: validation, code uniqueness, archive lifecycle, the closure
//! table hierarchy and cache-aside reads. [`TokenGateway`] persists OAuth 2.0
//! authorization records and answers token validity checks.

pub mod authority;
pub mod purge;
pub mod token;
pub mod usage;
pub mod validator;

pub use authority::{AuthorityGateway, PermissionGateway, PurgeReport, RoleGateway};
pub use purge::spawn_archive_purger;
pub use token::TokenGateway;
pub use usage::{RoleUsageGuard, UsageGuard};
pub use validator::{AccessTokenClaims, TokenValidator};
