//! Task log and replication state repositories.

use chrono::Utc;
use diesel::dsl::{count_star, max, min};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use log::{debug, info};
use std::sync::Arc;

use async_trait::async_trait;
use netplane_core::errors::{Error, ReplicationError, Result};
use netplane_core::replication::{
    FencingToken, NewTask, ReplicationState, ReplicationStateRepositoryTrait, Task,
    TaskLogRepositoryTrait, TaskLogStats,
};

use super::enum_to_db;
use super::model::{NewTaskDB, ReplicationStateDB, TaskDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{replication_state, tasks};

/// Appends one task inside the caller's transaction and returns its id.
pub fn append_task(
    conn: &mut SqliteConnection,
    task: NewTask,
    transaction_id: &str,
) -> Result<i64> {
    let row = NewTaskDB {
        task_type: enum_to_db(&task.task_type)?,
        data_type: enum_to_db(&task.data_type)?,
        resource_id: task.resource_id,
        data: task.data.as_ref().map(serde_json::to_string).transpose()?,
        transaction_id: transaction_id.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    let id = diesel::insert_into(tasks::table)
        .values(&row)
        .returning(tasks::id)
        .get_result::<i64>(conn)
        .map_err(StorageError::from)?;
    Ok(id)
}

#[derive(diesel::QueryableByName)]
struct SequenceRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    seq: i64,
}

/// Current fencing token: row count plus the AUTOINCREMENT high-water id.
pub(crate) fn read_fence(conn: &mut SqliteConnection) -> Result<FencingToken> {
    let row_count = tasks::table
        .select(count_star())
        .first::<i64>(conn)
        .map_err(StorageError::from)?;
    // sqlite_sequence has no row for `tasks` until the first insert.
    let high_water_id = diesel::sql_query("SELECT seq FROM sqlite_sequence WHERE name = 'tasks'")
        .get_result::<SequenceRow>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(|row| row.seq)
        .unwrap_or(0);
    Ok(FencingToken {
        row_count,
        high_water_id,
    })
}

/// Loads the singleton, refusing zero or duplicate rows.
pub(crate) fn load_state(conn: &mut SqliteConnection) -> Result<ReplicationState> {
    let mut rows = replication_state::table
        .order(replication_state::id.asc())
        .limit(2)
        .load::<ReplicationStateDB>(conn)
        .map_err(StorageError::from)?;
    if rows.len() != 1 {
        let total = replication_state::table
            .select(count_star())
            .first::<i64>(conn)
            .map_err(StorageError::from)?;
        return Err(ReplicationError::InvalidReplicationState {
            rows: total as usize,
        }
        .into());
    }
    Ok(ReplicationState::from(rows.remove(0)))
}

pub struct TaskLogRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl TaskLogRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }

    pub fn fencing_token(&self) -> Result<FencingToken> {
        let mut conn = get_connection(&self.pool)?;
        read_fence(&mut conn)
    }
}

#[async_trait]
impl TaskLogRepositoryTrait for TaskLogRepository {
    fn list_tasks(&self, since: Option<i64>, limit: i64) -> Result<Vec<Task>> {
        if limit <= 0 {
            return Err(Error::validation(format!(
                "task page size must be positive, got {limit}"
            )));
        }
        let mut conn = get_connection(&self.pool)?;
        let mut query = tasks::table.into_boxed();
        if let Some(since) = since {
            query = query.filter(tasks::id.gt(since));
        }
        query
            .order(tasks::id.asc())
            .limit(limit)
            .load::<TaskDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(TaskDB::into_domain)
            .collect()
    }

    fn task_stats(&self) -> Result<TaskLogStats> {
        let mut conn = get_connection(&self.pool)?;
        let (row_count, min_id, max_id) = tasks::table
            .select((count_star(), min(tasks::id), max(tasks::id)))
            .first::<(i64, Option<i64>, Option<i64>)>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(TaskLogStats {
            row_count,
            min_id,
            max_id,
        })
    }

    async fn purge_tasks(&self, up_to: i64) -> Result<usize> {
        let purged = self
            .writer
            .exec(move |conn| {
                let deleted = diesel::delete(tasks::table.filter(tasks::id.le(up_to)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(deleted)
            })
            .await?;
        debug!("[TaskLog] Purged {} tasks with id <= {}", purged, up_to);
        Ok(purged)
    }
}

pub struct ReplicationStateRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl ReplicationStateRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl ReplicationStateRepositoryTrait for ReplicationStateRepository {
    fn get_state(&self) -> Result<ReplicationState> {
        let mut conn = get_connection(&self.pool)?;
        load_state(&mut conn)
    }

    async fn set_readonly(&self, readonly: bool) -> Result<ReplicationState> {
        let state = self
            .writer
            .exec(move |conn| {
                // Validate first so a broken singleton is never written to.
                load_state(conn)?;
                diesel::update(replication_state::table)
                    .set((
                        replication_state::readonly.eq(i32::from(readonly)),
                        replication_state::updated_at.eq(Utc::now().to_rfc3339()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                load_state(conn)
            })
            .await?;
        info!("[TaskLog] Replication readonly={}", state.readonly);
        Ok(state)
    }

    async fn advance_watermark(&self, task_id: i64) -> Result<ReplicationState> {
        self.writer
            .exec(move |conn| {
                load_state(conn)?;
                diesel::update(replication_state::table)
                    .set((
                        replication_state::last_processed_task_id.eq(Some(task_id)),
                        replication_state::updated_at.eq(Utc::now().to_rfc3339()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                load_state(conn)
            })
            .await
    }
}
