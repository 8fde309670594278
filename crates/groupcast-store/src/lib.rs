//! # groupcast-store
//!
//! `SQLite` implementation of the membership store.
//!
//! - [`connection`]: r2d2 pool with WAL and busy-timeout pragmas
//! - [`migrations`]: embedded, versioned schema migrations
//! - [`repository`]: stateless SQL over the `memberships` table
//! - [`store`]: the async [`groupcast_core::MembershipStore`] adapter

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repository;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use errors::SqliteStoreError;
pub use repository::MembershipRepo;
pub use store::SqliteMembershipStore;
