//! Resync coordinator: rebuilds the task log from a fenced snapshot of the
//! resource tables.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::model::{DataType, FencingToken, ResyncAttempt, SyncStatus, RESYNC_ORDER};
use super::traits::ResyncRepositoryTrait;
use crate::errors::{Error, ReplicationError, Result};

/// Outcome of a successful resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncReport {
    pub attempt: ResyncAttempt,
    pub flush_task_id: i64,
    pub tasks_created: usize,
    pub fence: FencingToken,
    pub duration_ms: i64,
}

/// Correlator stamped on every row a resync writes.
pub fn resync_transaction_id(attempt_id: i64) -> String {
    format!("resync-{attempt_id}")
}

pub struct ResyncCoordinator {
    repository: Arc<dyn ResyncRepositoryTrait>,
    order: Vec<DataType>,
    running: Mutex<()>,
}

impl ResyncCoordinator {
    pub fn new(repository: Arc<dyn ResyncRepositoryTrait>) -> Self {
        Self {
            repository,
            order: RESYNC_ORDER.to_vec(),
            running: Mutex::new(()),
        }
    }

    /// Overrides the snapshot order. Types without a table are ignored.
    pub fn with_order(mut self, order: Vec<DataType>) -> Self {
        self.order = order
            .into_iter()
            .filter(|data_type| data_type.table_name().is_some())
            .collect();
        self
    }

    /// Runs one resync. Only one runs at a time per coordinator; a second
    /// caller gets `ResyncInProgress` instead of queueing behind the first.
    pub async fn resync(&self) -> Result<ResyncReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| Error::from(ReplicationError::ResyncInProgress))?;
        let started = Instant::now();

        let attempt = self.repository.start_attempt().await?;
        info!("[Resync] Attempt {} started", attempt.id);

        let snapshot = match self.repository.capture_snapshot(self.order.clone()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return Err(self
                    .fail(attempt.id, SyncStatus::Error, SyncStatus::Aborted, err)
                    .await);
            }
        };
        debug!(
            "[Resync] Attempt {} captured {} resources at fence {}",
            attempt.id,
            snapshot.entries.len(),
            snapshot.fence
        );

        let fence = snapshot.fence;
        let swap = self
            .repository
            .swap_task_log(fence, snapshot.entries, resync_transaction_id(attempt.id))
            .await;
        let summary = match swap {
            Ok(summary) => summary,
            Err(err) if err.is_resync_conflict() => {
                warn!("[Resync] Attempt {} aborted: {}", attempt.id, err);
                return Err(self
                    .fail(attempt.id, SyncStatus::Aborted, SyncStatus::Aborted, err)
                    .await);
            }
            Err(err) => {
                return Err(self
                    .fail(attempt.id, SyncStatus::Error, SyncStatus::Error, err)
                    .await);
            }
        };

        let finished = match self
            .repository
            .finish_attempt(attempt.id, SyncStatus::Completed, SyncStatus::Completed)
            .await
        {
            Ok(finished) => finished,
            Err(err) => {
                return Err(self
                    .fail(attempt.id, SyncStatus::Error, SyncStatus::Completed, err)
                    .await);
            }
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        info!(
            "[Resync] Attempt {} completed: flush task {}, {} baseline tasks in {}ms",
            finished.id, summary.flush_task_id, summary.tasks_created, duration_ms
        );
        Ok(ResyncReport {
            attempt: finished,
            flush_task_id: summary.flush_task_id,
            tasks_created: summary.tasks_created,
            fence,
            duration_ms,
        })
    }

    /// Records the terminal status and hands back the error that caused it.
    async fn fail(
        &self,
        attempt_id: i64,
        status: SyncStatus,
        tasks_status: SyncStatus,
        err: Error,
    ) -> Error {
        if status == SyncStatus::Error {
            error!("[Resync] Attempt {} failed: {}", attempt_id, err);
        }
        if let Err(mark_err) = self
            .repository
            .finish_attempt(attempt_id, status, tasks_status)
            .await
        {
            error!(
                "[Resync] Could not record {} for attempt {}: {}",
                status, attempt_id, mark_err
            );
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DatabaseError;
    use crate::replication::model::{ResourceSnapshot, SnapshotEntry, SwapSummary};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeResyncRepository {
        attempts: StdMutex<Vec<ResyncAttempt>>,
        entries: Vec<SnapshotEntry>,
        fence: Option<FencingToken>,
        observed_on_swap: Option<FencingToken>,
        fail_snapshot: bool,
        swapped: StdMutex<Vec<(String, usize)>>,
        requested_order: StdMutex<Vec<DataType>>,
    }

    impl FakeResyncRepository {
        fn with_entries(entries: Vec<SnapshotEntry>) -> Self {
            Self {
                entries,
                fence: Some(FencingToken {
                    row_count: 4,
                    high_water_id: 4,
                }),
                ..Default::default()
            }
        }

        fn attempt(&self, id: i64) -> ResyncAttempt {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .expect("attempt exists")
        }
    }

    #[async_trait]
    impl ResyncRepositoryTrait for FakeResyncRepository {
        async fn start_attempt(&self) -> Result<ResyncAttempt> {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = ResyncAttempt {
                id: attempts.len() as i64 + 1,
                sync_started_at: "2026-01-01T00:00:00Z".to_string(),
                sync_finished_at: None,
                sync_status: SyncStatus::Started,
                sync_tasks_status: SyncStatus::Started,
                stale: false,
            };
            attempts.push(attempt.clone());
            Ok(attempt)
        }

        async fn capture_snapshot(&self, order: Vec<DataType>) -> Result<ResourceSnapshot> {
            *self.requested_order.lock().unwrap() = order;
            if self.fail_snapshot {
                return Err(DatabaseError::QueryFailed("no such table: networks".into()).into());
            }
            Ok(ResourceSnapshot {
                entries: self.entries.clone(),
                fence: self.fence.unwrap_or(FencingToken {
                    row_count: 0,
                    high_water_id: 0,
                }),
            })
        }

        async fn swap_task_log(
            &self,
            fence: FencingToken,
            entries: Vec<SnapshotEntry>,
            transaction_id: String,
        ) -> Result<SwapSummary> {
            if let Some(observed) = self.observed_on_swap {
                if observed != fence {
                    return Err(ReplicationError::ResyncConflict {
                        expected: fence,
                        observed,
                    }
                    .into());
                }
            }
            self.swapped
                .lock()
                .unwrap()
                .push((transaction_id, entries.len()));
            Ok(SwapSummary {
                flush_task_id: fence.high_water_id + 1,
                tasks_created: entries.len(),
            })
        }

        async fn finish_attempt(
            &self,
            attempt_id: i64,
            status: SyncStatus,
            tasks_status: SyncStatus,
        ) -> Result<ResyncAttempt> {
            let mut attempts = self.attempts.lock().unwrap();
            for attempt in attempts.iter_mut() {
                if attempt.id == attempt_id {
                    attempt.sync_status = status;
                    attempt.sync_tasks_status = tasks_status;
                    attempt.sync_finished_at = Some("2026-01-01T00:00:01Z".to_string());
                } else if status == SyncStatus::Completed {
                    attempt.stale = true;
                }
            }
            attempts
                .iter()
                .find(|a| a.id == attempt_id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("resync attempt {attempt_id}")))
        }

        fn get_attempt(&self, attempt_id: i64) -> Result<Option<ResyncAttempt>> {
            Ok(self
                .attempts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == attempt_id)
                .cloned())
        }

        fn list_attempts(&self, limit: i64) -> Result<Vec<ResyncAttempt>> {
            let mut attempts = self.attempts.lock().unwrap().clone();
            attempts.reverse();
            attempts.truncate(limit as usize);
            Ok(attempts)
        }
    }

    fn entry(data_type: DataType, id: &str) -> SnapshotEntry {
        SnapshotEntry {
            data_type,
            resource_id: id.to_string(),
            data: json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn completed_resync_reports_baseline() {
        let repo = Arc::new(FakeResyncRepository::with_entries(vec![
            entry(DataType::Network, "n1"),
            entry(DataType::Subnet, "s1"),
        ]));
        let coordinator = ResyncCoordinator::new(repo.clone());

        let report = coordinator.resync().await.expect("resync");
        assert_eq!(report.tasks_created, 2);
        assert_eq!(report.flush_task_id, 5);
        assert_eq!(report.attempt.sync_status, SyncStatus::Completed);
        assert_eq!(
            repo.swapped.lock().unwrap().clone(),
            vec![("resync-1".to_string(), 2)]
        );
        assert_eq!(repo.requested_order.lock().unwrap().clone(), RESYNC_ORDER.to_vec());
    }

    #[tokio::test]
    async fn fence_mismatch_marks_attempt_aborted() {
        let mut repo = FakeResyncRepository::with_entries(vec![entry(DataType::Network, "n1")]);
        repo.observed_on_swap = Some(FencingToken {
            row_count: 5,
            high_water_id: 5,
        });
        let repo = Arc::new(repo);
        let coordinator = ResyncCoordinator::new(repo.clone());

        let err = coordinator.resync().await.expect_err("conflict");
        assert!(err.is_resync_conflict());
        let attempt = repo.attempt(1);
        assert_eq!(attempt.sync_status, SyncStatus::Aborted);
        assert_eq!(attempt.sync_tasks_status, SyncStatus::Aborted);
        assert!(repo.swapped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_failure_marks_attempt_error() {
        let mut repo = FakeResyncRepository::with_entries(vec![]);
        repo.fail_snapshot = true;
        let repo = Arc::new(repo);
        let coordinator = ResyncCoordinator::new(repo.clone());

        let err = coordinator.resync().await.expect_err("snapshot failure");
        assert!(matches!(err, Error::Database(DatabaseError::QueryFailed(_))));
        let attempt = repo.attempt(1);
        assert_eq!(attempt.sync_status, SyncStatus::Error);
        assert_eq!(attempt.sync_tasks_status, SyncStatus::Aborted);
    }

    #[tokio::test]
    async fn later_completed_attempt_marks_earlier_stale() {
        let repo = Arc::new(FakeResyncRepository::with_entries(vec![]));
        let coordinator = ResyncCoordinator::new(repo.clone());
        coordinator.resync().await.expect("first");
        coordinator.resync().await.expect("second");
        assert!(repo.attempt(1).stale);
        assert!(!repo.attempt(2).stale);
    }

    #[tokio::test]
    async fn concurrent_resync_is_refused() {
        let repo = Arc::new(FakeResyncRepository::with_entries(vec![]));
        let coordinator = ResyncCoordinator::new(repo);
        let _held = coordinator.running.lock().await;
        let err = coordinator.resync().await.expect_err("in progress");
        assert!(matches!(
            err,
            Error::Replication(ReplicationError::ResyncInProgress)
        ));
    }

    #[test]
    fn custom_order_drops_control_types() {
        let repo = Arc::new(FakeResyncRepository::default());
        let coordinator = ResyncCoordinator::new(repo)
            .with_order(vec![DataType::Subnet, DataType::Config, DataType::Network]);
        assert_eq!(coordinator.order, vec![DataType::Subnet, DataType::Network]);
    }
}
