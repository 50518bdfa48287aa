//! Error types for docql

use thiserror::Error;

/// Result type alias for docql operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error types for query parsing, compilation, and execution
#[derive(Debug, Error)]
pub enum StoreError {
    /// The URI query string is malformed
    #[error("parse error at position {pos}: expected {expected}")]
    Parse {
        /// Byte offset into the query string where parsing stopped
        pos: usize,
        /// What the parser expected to find there
        expected: String,
    },

    /// The query is well-formed but semantically invalid
    #[error("validation error: {0}")]
    Validation(String),

    /// Database failure (parameter values are never included)
    #[error("backend error: {0}")]
    Backend(String),

    /// A restore was requested but no matching audit rows exist
    #[error("no matching audit rows: {0}")]
    AuditMissing(String),

    /// Primary-key collision on insert or restore
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl StoreError {
    /// Create a parse error at the given byte position
    pub fn parse(pos: usize, expected: impl Into<String>) -> Self {
        Self::Parse {
            pos,
            expected: expected.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Check if this is a parse error
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is an integrity (uniqueness) error
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Check if this is a missing-audit error
    pub fn is_audit_missing(&self) -> bool {
        matches!(self, Self::AuditMissing(_))
    }

    /// Parse a tokio_postgres error into a more specific StoreError
    pub fn from_pg_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            if db_err.code().code() == "23505" {
                return Self::Integrity(format!("{constraint}: {message}"));
            }
        }
        Self::Backend(err.to_string())
    }

    /// Parse a rusqlite error into a more specific StoreError
    pub fn from_sqlite_error(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            return Self::Integrity(err.to_string());
        }
        Self::Backend(err.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::from_pg_error(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::from_sqlite_error(err)
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Backend(format!("pool: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("json decode: {err}"))
    }
}
