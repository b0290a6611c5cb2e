//! Database error types

use clipfund_types::TypesError;
use thiserror::Error;

/// Store operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Settlement found payout already COMPLETED
    #[error("Already settled: {0}")]
    AlreadySettled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored row could not be decoded into a domain type
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<TypesError> for DbError {
    fn from(e: TypesError) -> Self {
        DbError::CorruptRow(e.to_string())
    }
}

/// Result type for store operations
pub type DbResult<T> = Result<T, DbError>;
