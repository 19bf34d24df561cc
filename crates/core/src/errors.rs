//! Error types shared by every netplane crate.

use thiserror::Error;

use crate::mutation::Operation;
use crate::replication::{DataType, FencingToken};

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create connection pool: {0}")]
    PoolCreationFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Transient lock contention (busy/locked/deadlock). The only error the
    /// local-phase retry policy retries.
    #[error("Local contention: {0}")]
    LocalContention(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Errors specific to the replication subsystem.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// A mutation interleaved between the resync snapshot and the swap.
    #[error("Resync conflict: task log changed between snapshot and swap (expected {expected}, observed {observed})")]
    ResyncConflict {
        expected: FencingToken,
        observed: FencingToken,
    },

    /// The replication state singleton is missing or duplicated.
    #[error("Invalid replication state: expected exactly one state row, found {rows}")]
    InvalidReplicationState { rows: usize },

    #[error("Remote apply of {operation} {data_type}/{resource_id} failed: {message}{}",
        .compensation_error.as_ref().map(|e| format!(" (compensation also failed: {e})")).unwrap_or_default())]
    RemoteApplyFailed {
        data_type: DataType,
        resource_id: String,
        operation: Operation,
        message: String,
        compensation_error: Option<String>,
    },

    #[error("Compensation failed: {0}")]
    CompensationFailed(String),

    #[error("Replication is in read-only mode; mutations are refused")]
    ReadOnly,

    #[error("A resync is already in progress")]
    ResyncInProgress,
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Database(DatabaseError::NotFound(message.into()))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Database(DatabaseError::LocalContention(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Database(DatabaseError::NotFound(_)))
    }

    pub fn is_resync_conflict(&self) -> bool {
        matches!(
            self,
            Self::Replication(ReplicationError::ResyncConflict { .. })
        )
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Replication(ReplicationError::ReadOnly))
    }
}
