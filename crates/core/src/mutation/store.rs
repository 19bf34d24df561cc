use async_trait::async_trait;

use super::model::Resource;
use crate::errors::Result;
use crate::replication::{DataType, NewTask, ReplicationState};

/// Operations available inside one local transaction. Everything done through
/// a `StoreTx` commits or rolls back together.
pub trait StoreTx: Send {
    /// Correlator stamped on every task appended in this transaction.
    fn transaction_id(&self) -> &str;

    fn replication_state(&mut self) -> Result<ReplicationState>;

    fn load_resource(&mut self, data_type: DataType, id: &str) -> Result<Option<Resource>>;

    /// Fails with `UniqueViolation` if the id is taken.
    fn insert_resource(
        &mut self,
        data_type: DataType,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Resource>;

    /// Fails with `NotFound` if the row does not exist.
    fn replace_resource(
        &mut self,
        data_type: DataType,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Resource>;

    /// Returns whether a row was removed.
    fn delete_resource(&mut self, data_type: DataType, id: &str) -> Result<bool>;

    /// Appends to the task log and returns the new task id.
    fn append_task(&mut self, task: NewTask) -> Result<i64>;
}

/// The relational store the orchestrator writes through.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Runs `job` in a single transaction. `Err` from the job rolls back.
    async fn transaction<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn StoreTx) -> Result<T> + Send + 'static;

    fn get_resource(&self, data_type: DataType, id: &str) -> Result<Option<Resource>>;

    fn list_resources(&self, data_type: DataType) -> Result<Vec<Resource>>;
}
