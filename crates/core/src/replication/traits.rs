//! Repository contracts implemented by the storage crate.

use async_trait::async_trait;

use super::model::{
    DataType, FencingToken, ReplicationState, ResourceSnapshot, ResyncAttempt, SnapshotEntry,
    SwapSummary, SyncStatus, Task, TaskLogStats,
};
use crate::errors::Result;

/// Read and maintenance access to the task log. Appends only happen inside a
/// mutation transaction (see `StoreTx::append_task`).
#[async_trait]
pub trait TaskLogRepositoryTrait: Send + Sync {
    /// Tasks with `id > since` (all when `None`), ascending, at most `limit`.
    fn list_tasks(&self, since: Option<i64>, limit: i64) -> Result<Vec<Task>>;

    fn task_stats(&self) -> Result<TaskLogStats>;

    /// Deletes every task with `id <= up_to`. Idempotent.
    async fn purge_tasks(&self, up_to: i64) -> Result<usize>;
}

/// The replication state singleton (watermark tracker).
#[async_trait]
pub trait ReplicationStateRepositoryTrait: Send + Sync {
    /// Fails with `InvalidReplicationState` unless exactly one row exists.
    fn get_state(&self) -> Result<ReplicationState>;

    /// Flips the read-only gate and persists it immediately.
    async fn set_readonly(&self, readonly: bool) -> Result<ReplicationState>;

    async fn advance_watermark(&self, task_id: i64) -> Result<ReplicationState>;
}

/// Storage side of the resync algorithm.
#[async_trait]
pub trait ResyncRepositoryTrait: Send + Sync {
    /// Records a new attempt with status STARTED.
    async fn start_attempt(&self) -> Result<ResyncAttempt>;

    /// Reads every resource table under the global snapshot lock and takes
    /// the fencing token before the lock is released.
    async fn capture_snapshot(&self, order: Vec<DataType>) -> Result<ResourceSnapshot>;

    /// Under the task log write lock: re-reads the fencing token and fails
    /// with `ResyncConflict` if it moved; otherwise truncates the log, writes
    /// a FLUSH sentinel and one CREATE per entry, in order.
    async fn swap_task_log(
        &self,
        fence: FencingToken,
        entries: Vec<SnapshotEntry>,
        transaction_id: String,
    ) -> Result<SwapSummary>;

    /// Moves a STARTED attempt to a terminal status. A COMPLETED attempt
    /// becomes the active version and every earlier attempt is marked stale.
    async fn finish_attempt(
        &self,
        attempt_id: i64,
        status: SyncStatus,
        tasks_status: SyncStatus,
    ) -> Result<ResyncAttempt>;

    fn get_attempt(&self, attempt_id: i64) -> Result<Option<ResyncAttempt>>;

    /// Most recent attempts first.
    fn list_attempts(&self, limit: i64) -> Result<Vec<ResyncAttempt>>;
}
