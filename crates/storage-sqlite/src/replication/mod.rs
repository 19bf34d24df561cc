//! SQLite persistence for the replication subsystem.

mod model;
mod repository;
mod resources;
mod resync;
mod store;

pub use model::{NewResyncAttemptDB, NewTaskDB, ReplicationStateDB, ResyncAttemptDB, TaskDB};
pub use repository::{append_task, ReplicationStateRepository, TaskLogRepository};
pub use resync::ResyncRepository;
pub use store::SqliteStateStore;

use netplane_core::errors::{DatabaseError, Error, Result};

fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

fn parse_json_column(value: &str) -> Result<serde_json::Value> {
    serde_json::from_str(value).map_err(|e| {
        Error::Database(DatabaseError::Internal(format!(
            "Stored JSON column is malformed: {}",
            e
        )))
    })
}

fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}
