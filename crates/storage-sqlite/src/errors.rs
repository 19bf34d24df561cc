//! Storage error type and its mapping onto the core error taxonomy.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use netplane_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] DieselError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    Migration(String),

    /// A core error raised inside a storage closure, carried back out
    /// unchanged.
    #[error(transparent)]
    Core(#[from] Error),
}

/// SQLite reports lock contention only through the message text.
fn is_contention_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
        || message.contains("deadlock")
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Core(inner) => inner,
            StorageError::Query(DieselError::NotFound) => {
                DatabaseError::NotFound("record not found".to_string()).into()
            }
            StorageError::Query(DieselError::DatabaseError(kind, info)) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => {
                        DatabaseError::UniqueViolation(message).into()
                    }
                    _ if is_contention_message(&message) => {
                        DatabaseError::LocalContention(message).into()
                    }
                    _ => DatabaseError::QueryFailed(message).into(),
                }
            }
            StorageError::Query(other) => {
                let message = other.to_string();
                if is_contention_message(&message) {
                    DatabaseError::LocalContention(message).into()
                } else {
                    DatabaseError::QueryFailed(message).into()
                }
            }
            StorageError::Pool(err) => DatabaseError::ConnectionFailed(err.to_string()).into(),
            StorageError::Connection(err) => {
                DatabaseError::ConnectionFailed(err.to_string()).into()
            }
            StorageError::Migration(message) => DatabaseError::MigrationFailed(message).into(),
        }
    }
}
