//! Storage traits for authorities and authorization records.
//!
//! # Implementations
//!
//! Storage implementations are provided in separate crates:
//!
//! - `mumu-iam-memory` - in-memory backend for tests and single-node use
//! - `mumu-iam-postgres` - PostgreSQL backend

pub mod authority;
pub mod token;

pub use authority::{AuthorityStorage, AuthorityTransaction};
pub use token::TokenStorage;
