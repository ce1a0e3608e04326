// ABOUTME: Error type shared by every store operation.
// ABOUTME: Separates failures worth retrying from ones that are fatal on first sight.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored row has {0}")]
    InvalidEntityId(#[from] hearth_core::EntityIdError),

    #[error("invalid schema version: {0}")]
    InvalidSchemaVersion(i64),

    #[error("store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("migration to schema version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: Box<StoreError>,
    },

    #[error("recorder run {0} is not open")]
    RunNotOpen(i64),
}

impl StoreError {
    /// Store-engine failures are retried: lock contention clears up on its own,
    /// and a bad statement still only costs the bounded retry budget.
    /// Everything else fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Sqlite(_))
    }

    /// Lock contention or a busy database, the failures retrying is meant for.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn busy_database_is_transient_and_retryable() {
        let err = sqlite_failure(rusqlite::ffi::SQLITE_BUSY);
        assert!(err.is_transient());
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_statement_is_retryable_but_not_transient() {
        let err = StoreError::Sqlite(rusqlite::Error::InvalidQuery);
        assert!(err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn validation_failures_are_fatal() {
        assert!(!StoreError::InvalidSchemaVersion(-1).is_retryable());
        assert!(!StoreError::RunNotOpen(4).is_retryable());
    }

    #[test]
    fn migration_error_names_the_version() {
        let err = StoreError::Migration {
            version: 2,
            source: Box::new(StoreError::InvalidSchemaVersion(2)),
        };
        assert!(err.to_string().contains("schema version 2"));
    }
}
