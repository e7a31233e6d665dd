//! # mumu-iam
//!
//! Identity and access management core for MuMu.
//!
//! This crate provides:
//! - Roles and permissions with a closure-table hierarchy
//! - Soft-delete archive lifecycle with periodic purge
//! - Cache-aside reads with tiered TTLs over a local or Redis cache
//! - Post-commit cache invalidation with bounded retries
//! - OAuth 2.0 authorization record storage and token validity checks
//! - A registry of live push connections
//!
//! ## Modules
//!
//! - [`types`] - Domain entities, paging and token values
//! - [`error`] - Error taxonomy
//! - [`config`] - Layered TOML/environment configuration
//! - [`storage`] - Async storage traits implemented by backend crates
//! - [`hierarchy`] - Closure table maintenance
//! - [`cache`] - Cache backends, typed entity cache and invalidation queue
//! - [`unit_of_work`] - Transaction plus invalidation on commit
//! - [`gateway`] - Public operations over authorities and tokens
//! - [`registry`] - Connection registry
//! - [`observability`] - Tracing setup

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hierarchy;
pub mod observability;
pub mod registry;
pub mod storage;
pub mod types;
pub mod unit_of_work;

pub use config::{ConfigError, IamConfig};
pub use error::{CacheError, CacheResult, ErrorCategory, IamError, IamResult};
pub use gateway::{
    AccessTokenClaims, AuthorityGateway, PermissionGateway, PurgeReport, RoleGateway,
    RoleUsageGuard, TokenGateway, TokenValidator, UsageGuard, spawn_archive_purger,
};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use storage::{AuthorityStorage, AuthorityTransaction, TokenStorage};
pub use types::{
    AuditMetadata, Authority, AuthorityFilter, AuthorityKind, AuthorityPath,
    AuthorizationGrantType, Page, PageRequest, Permission, PermissionPatch, Role, RoleBuilder,
    RolePatch, Slice, TokenKind, TokenRecord, TokenValue,
};
pub use unit_of_work::UnitOfWork;
