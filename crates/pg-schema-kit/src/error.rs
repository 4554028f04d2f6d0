//! Error types for the schema toolkit.

use thiserror::Error;

/// Main error type for schema toolkit operations.
#[derive(Error, Debug)]
pub enum SchemaKitError {
    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Configuration error (invalid ssl_mode, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// `done` was called on a root handle
    #[error("not in a transaction")]
    NotInTransaction,

    /// A scoped transaction closure panicked; the transaction was rolled back
    #[error("encountered panic during transaction")]
    PanicDuringTransaction,

    /// An advisory locker was constructed from an in-transaction handle
    #[error("locker database must not be in a transaction")]
    InTransaction,

    /// Two migration definitions share an identifier
    #[error("duplicate migration identifier {0}")]
    DuplicateMigrationId(i32),

    /// A migration identifier was requested that is not in the definition set
    #[error("migration {0} not found")]
    MigrationNotFound(i32),

    /// A migration definition failed validation
    #[error("{0}")]
    InvalidMigration(String),

    /// A previous attempt at this migration was recorded as failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Batch insert received the wrong number of values
    #[error("received {given} values for {expected} columns")]
    BadInsertArity { given: usize, expected: usize },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Two errors raised by one operation, e.g. a failed query followed by a
    /// failed rollback. Neither is swallowed.
    #[error("{original}; additionally: {secondary}")]
    Composite {
        original: Box<SchemaKitError>,
        secondary: Box<SchemaKitError>,
    },
}

impl SchemaKitError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        SchemaKitError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Combine two errors into a composite.
    pub fn compose(original: SchemaKitError, secondary: SchemaKitError) -> Self {
        SchemaKitError::Composite {
            original: Box::new(original),
            secondary: Box::new(secondary),
        }
    }
}

/// Merge an operation result with the result of a finalization step
/// (commit, rollback, log update). The operation error takes precedence; a
/// finalization error is attached rather than dropped.
pub(crate) fn join_finalize<T>(
    result: Result<T>,
    finalize: Result<()>,
) -> Result<T> {
    match (result, finalize) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(finalize_err)) => Err(finalize_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(finalize_err)) => Err(SchemaKitError::compose(err, finalize_err)),
    }
}

/// Result type alias for schema toolkit operations.
pub type Result<T> = std::result::Result<T, SchemaKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_finalize() {
        assert_eq!(join_finalize(Ok(7), Ok(())).unwrap(), 7);

        let err = join_finalize(Ok(7), Err(SchemaKitError::NotInTransaction)).unwrap_err();
        assert_eq!(err.to_string(), "not in a transaction");

        let err = join_finalize::<()>(
            Err(SchemaKitError::Cancelled),
            Err(SchemaKitError::NotInTransaction),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "operation cancelled; additionally: not in a transaction"
        );
    }
}
