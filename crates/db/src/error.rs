//! Persistence errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("no {table} row with id '{id}'")]
    NotFound { table: &'static str, id: String },

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    pub fn not_found(table: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { table, id: id.into() }
    }
}
