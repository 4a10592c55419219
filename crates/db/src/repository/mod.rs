//! Repository functions: one function per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! Plain SQL only: domain types and business logic live in `engine`.

pub mod workflows;
pub mod nodes;
pub mod history;
