//! SQLite storage for netplane.
//!
//! Reads go through an r2d2 pool; every write runs on the single writer actor
//! (`db::WriteHandle`) inside an IMMEDIATE transaction.

pub mod db;
pub mod errors;
pub mod replication;
pub mod schema;

pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle};
pub use errors::StorageError;
pub use replication::{
    append_task, ReplicationStateRepository, ResyncRepository, SqliteStateStore,
    TaskLogRepository,
};
