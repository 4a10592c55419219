//! `db` crate: pure persistence layer.
//!
//! Provides a SQLite connection pool, typed row structs, and repository
//! functions for every table of the flowgraph schema. No business logic
//! lives here; graph invariants are enforced by the `engine` crate.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;

pub use pool::DbPool;
pub use error::DbError;
