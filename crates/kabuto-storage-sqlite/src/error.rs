//! Error types

use rusqlite::ErrorCode;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A write conflicted with a store-enforced uniqueness or reference invariant
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Operation attempted against a torn-down connection
    #[error("Store is closed")]
    StoreClosed,

    /// Database error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Memo sealing/unsealing error
    #[error("Memo encryption error: {0}")]
    MemoEncryption(String),

    /// Row contents failed validation on read or write
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        // Uniqueness and FK violations are part of the store contract, not
        // generic database failures.
        if let rusqlite::Error::SqliteFailure(ffi_err, ref msg) = e {
            if matches!(
                ffi_err.code,
                ErrorCode::ConstraintViolation
            ) {
                return Error::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| ffi_err.to_string()),
                );
            }
        }
        Error::Database(e)
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_code_maps_to_constraint_violation() {
        let ffi = rusqlite::ffi::Error {
            code: ErrorCode::ConstraintViolation,
            extended_code: 2067, // SQLITE_CONSTRAINT_UNIQUE
        };
        let e: Error =
            rusqlite::Error::SqliteFailure(ffi, Some("UNIQUE constraint failed".into())).into();
        assert!(matches!(e, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_other_codes_stay_database_errors() {
        let e: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(e, Error::Database(_)));
    }
}
