//! Storage side of the resync: attempt log, snapshot lock, fenced swap.

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};
use std::sync::Arc;

use async_trait::async_trait;
use netplane_core::errors::{DatabaseError, Error, ReplicationError, Result};
use netplane_core::replication::{
    DataType, FencingToken, NewTask, ResourceSnapshot, ResyncAttempt, ResyncRepositoryTrait,
    SnapshotEntry, SwapSummary, SyncStatus,
};

use super::enum_to_db;
use super::model::{NewResyncAttemptDB, ResyncAttemptDB};
use super::repository::{append_task, read_fence};
use super::resources::snapshot_entries;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{replication_state, resync_attempts, tasks};

pub struct ResyncRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl ResyncRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

fn load_attempt(conn: &mut SqliteConnection, attempt_id: i64) -> Result<Option<ResyncAttempt>> {
    resync_attempts::table
        .find(attempt_id)
        .first::<ResyncAttemptDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(ResyncAttemptDB::into_domain)
        .transpose()
}

#[async_trait]
impl ResyncRepositoryTrait for ResyncRepository {
    async fn start_attempt(&self) -> Result<ResyncAttempt> {
        self.writer
            .exec(|conn| {
                let started = enum_to_db(&SyncStatus::Started)?;
                let row = NewResyncAttemptDB {
                    sync_started_at: Utc::now().to_rfc3339(),
                    sync_status: started.clone(),
                    sync_tasks_status: started,
                    stale: 0,
                };
                diesel::insert_into(resync_attempts::table)
                    .values(&row)
                    .returning(ResyncAttemptDB::as_returning())
                    .get_result(conn)
                    .map_err(StorageError::from)?
                    .into_domain()
            })
            .await
    }

    async fn capture_snapshot(&self, order: Vec<DataType>) -> Result<ResourceSnapshot> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<ResourceSnapshot> {
            let mut conn = get_connection(&pool)?;
            // BEGIN IMMEDIATE takes the reserved lock: writers wait on the
            // busy timeout, readers proceed.
            conn.immediate_transaction::<_, StorageError, _>(|tx| {
                let entries = snapshot_entries(tx, &order)?;
                let fence = read_fence(tx)?;
                Ok(ResourceSnapshot { entries, fence })
            })
            .map_err(Error::from)
        })
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::Internal(format!(
                "Snapshot worker failed: {}",
                e
            )))
        })?
    }

    async fn swap_task_log(
        &self,
        fence: FencingToken,
        entries: Vec<SnapshotEntry>,
        transaction_id: String,
    ) -> Result<SwapSummary> {
        self.writer
            .exec(move |conn| {
                let observed = read_fence(conn)?;
                if observed != fence {
                    warn!(
                        "[Resync] Fence moved between snapshot and swap: expected {}, observed {}",
                        fence, observed
                    );
                    return Err(ReplicationError::ResyncConflict {
                        expected: fence,
                        observed,
                    }
                    .into());
                }

                let removed = diesel::delete(tasks::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                let flush_task_id = append_task(conn, NewTask::flush(), &transaction_id)?;
                let tasks_created = entries.len();
                for entry in entries {
                    append_task(
                        conn,
                        NewTask::create(entry.data_type, entry.resource_id, entry.data),
                        &transaction_id,
                    )?;
                }
                debug!(
                    "[Resync] Replaced {} tasks with flush {} and {} baseline tasks",
                    removed, flush_task_id, tasks_created
                );
                Ok(SwapSummary {
                    flush_task_id,
                    tasks_created,
                })
            })
            .await
    }

    async fn finish_attempt(
        &self,
        attempt_id: i64,
        status: SyncStatus,
        tasks_status: SyncStatus,
    ) -> Result<ResyncAttempt> {
        if !status.is_terminal() {
            return Err(Error::validation(format!(
                "resync attempt {attempt_id} cannot be finished as {status}"
            )));
        }
        self.writer
            .exec(move |conn| {
                let started = enum_to_db(&SyncStatus::Started)?;
                // The STARTED guard makes the terminal transition happen once.
                let updated = diesel::update(
                    resync_attempts::table
                        .filter(resync_attempts::id.eq(attempt_id))
                        .filter(resync_attempts::sync_status.eq(&started)),
                )
                .set((
                    resync_attempts::sync_status.eq(enum_to_db(&status)?),
                    resync_attempts::sync_tasks_status.eq(enum_to_db(&tasks_status)?),
                    resync_attempts::sync_finished_at.eq(Some(Utc::now().to_rfc3339())),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;

                if updated == 0 {
                    return match load_attempt(conn, attempt_id)? {
                        Some(existing) => Err(Error::validation(format!(
                            "resync attempt {} already finished as {}",
                            attempt_id, existing.sync_status
                        ))),
                        None => Err(Error::not_found(format!("resync attempt {attempt_id}"))),
                    };
                }

                if status == SyncStatus::Completed {
                    diesel::update(
                        resync_attempts::table.filter(resync_attempts::id.ne(attempt_id)),
                    )
                    .set(resync_attempts::stale.eq(1))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                    diesel::update(replication_state::table)
                        .set((
                            replication_state::active_version.eq(Some(attempt_id)),
                            replication_state::updated_at.eq(Utc::now().to_rfc3339()),
                        ))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }

                load_attempt(conn, attempt_id)?
                    .ok_or_else(|| Error::not_found(format!("resync attempt {attempt_id}")))
            })
            .await
    }

    fn get_attempt(&self, attempt_id: i64) -> Result<Option<ResyncAttempt>> {
        let mut conn = get_connection(&self.pool)?;
        load_attempt(&mut conn, attempt_id)
    }

    fn list_attempts(&self, limit: i64) -> Result<Vec<ResyncAttempt>> {
        let mut conn = get_connection(&self.pool)?;
        resync_attempts::table
            .order(resync_attempts::id.desc())
            .limit(limit.max(0))
            .load::<ResyncAttemptDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(ResyncAttemptDB::into_domain)
            .collect()
    }
}
