//! Administrative surface over the replication subsystem.

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use super::model::{ReplicationState, ResyncAttempt, TaskLogStats};
use super::replay::{current_state, MaterializedState};
use super::resync::{ResyncCoordinator, ResyncReport};
use super::traits::{
    ReplicationStateRepositoryTrait, ResyncRepositoryTrait, TaskLogRepositoryTrait,
};
use crate::errors::{Error, Result};

/// Snapshot of everything an operator looks at first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus {
    pub state: ReplicationState,
    pub task_log: TaskLogStats,
    pub latest_attempt: Option<ResyncAttempt>,
}

#[async_trait]
pub trait ReplicationAdminServiceTrait: Send + Sync {
    fn status(&self) -> Result<ReplicationStatus>;

    async fn set_readonly(&self, readonly: bool) -> Result<ReplicationState>;

    async fn trigger_resync(&self) -> Result<ResyncReport>;

    /// Deletes tasks with `id <= up_to`.
    async fn purge_tasks(&self, up_to: i64) -> Result<usize>;

    /// Deletes tasks the consumer has already applied, per the recorded
    /// watermark. No-op when no watermark has been recorded.
    async fn purge_processed_tasks(&self) -> Result<usize>;

    async fn advance_watermark(&self, task_id: i64) -> Result<ReplicationState>;

    fn list_attempts(&self, limit: i64) -> Result<Vec<ResyncAttempt>>;

    fn current_state(&self) -> Result<MaterializedState>;
}

pub struct ReplicationAdminService {
    state_repository: Arc<dyn ReplicationStateRepositoryTrait>,
    task_log: Arc<dyn TaskLogRepositoryTrait>,
    resync_repository: Arc<dyn ResyncRepositoryTrait>,
    coordinator: Arc<ResyncCoordinator>,
    page_size: i64,
}

impl ReplicationAdminService {
    pub fn new(
        state_repository: Arc<dyn ReplicationStateRepositoryTrait>,
        task_log: Arc<dyn TaskLogRepositoryTrait>,
        resync_repository: Arc<dyn ResyncRepositoryTrait>,
        coordinator: Arc<ResyncCoordinator>,
        page_size: i64,
    ) -> Self {
        Self {
            state_repository,
            task_log,
            resync_repository,
            coordinator,
            page_size,
        }
    }
}

#[async_trait]
impl ReplicationAdminServiceTrait for ReplicationAdminService {
    fn status(&self) -> Result<ReplicationStatus> {
        Ok(ReplicationStatus {
            state: self.state_repository.get_state()?,
            task_log: self.task_log.task_stats()?,
            latest_attempt: self.resync_repository.list_attempts(1)?.into_iter().next(),
        })
    }

    async fn set_readonly(&self, readonly: bool) -> Result<ReplicationState> {
        info!("[Admin] Setting readonly={}", readonly);
        self.state_repository.set_readonly(readonly).await
    }

    async fn trigger_resync(&self) -> Result<ResyncReport> {
        info!("[Admin] Resync requested");
        self.coordinator.resync().await
    }

    async fn purge_tasks(&self, up_to: i64) -> Result<usize> {
        if up_to < 0 {
            return Err(Error::validation(format!(
                "purge bound must be non-negative, got {up_to}"
            )));
        }
        let purged = self.task_log.purge_tasks(up_to).await?;
        info!("[Admin] Purged {} tasks up to id {}", purged, up_to);
        Ok(purged)
    }

    async fn purge_processed_tasks(&self) -> Result<usize> {
        match self.state_repository.get_state()?.last_processed_task_id {
            Some(watermark) => self.purge_tasks(watermark).await,
            None => Ok(0),
        }
    }

    async fn advance_watermark(&self, task_id: i64) -> Result<ReplicationState> {
        if task_id < 0 {
            return Err(Error::validation(format!(
                "watermark must be non-negative, got {task_id}"
            )));
        }
        self.state_repository.advance_watermark(task_id).await
    }

    fn list_attempts(&self, limit: i64) -> Result<Vec<ResyncAttempt>> {
        self.resync_repository.list_attempts(limit)
    }

    fn current_state(&self) -> Result<MaterializedState> {
        current_state(self.task_log.as_ref(), self.page_size)
    }
}
