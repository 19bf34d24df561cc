//! Database models for the replication tables.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use netplane_core::errors::Result;
use netplane_core::replication::{ReplicationState, ResyncAttempt, Task};

use super::{enum_from_db, parse_json_column};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskDB {
    pub id: i64,
    pub task_type: String,
    pub data_type: String,
    pub resource_id: Option<String>,
    pub data: Option<String>,
    pub transaction_id: String,
    pub created_at: String,
}

/// Insert form of a task; the id comes from AUTOINCREMENT.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewTaskDB {
    pub task_type: String,
    pub data_type: String,
    pub resource_id: Option<String>,
    pub data: Option<String>,
    pub transaction_id: String,
    pub created_at: String,
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::replication_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReplicationStateDB {
    pub id: i32,
    pub last_processed_task_id: Option<i64>,
    pub active_version: Option<i64>,
    pub readonly: i32,
    pub updated_at: String,
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::resync_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ResyncAttemptDB {
    pub id: i64,
    pub sync_started_at: String,
    pub sync_finished_at: Option<String>,
    pub sync_status: String,
    pub sync_tasks_status: String,
    pub stale: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::resync_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewResyncAttemptDB {
    pub sync_started_at: String,
    pub sync_status: String,
    pub sync_tasks_status: String,
    pub stale: i32,
}

impl TaskDB {
    pub fn into_domain(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            task_type: enum_from_db(&self.task_type)?,
            data_type: enum_from_db(&self.data_type)?,
            resource_id: self.resource_id,
            data: self.data.as_deref().map(parse_json_column).transpose()?,
            transaction_id: self.transaction_id,
            created_at: self.created_at,
        })
    }
}

impl From<ReplicationStateDB> for ReplicationState {
    fn from(row: ReplicationStateDB) -> Self {
        Self {
            last_processed_task_id: row.last_processed_task_id,
            active_version: row.active_version,
            readonly: row.readonly != 0,
            updated_at: row.updated_at,
        }
    }
}

impl ResyncAttemptDB {
    pub fn into_domain(self) -> Result<ResyncAttempt> {
        Ok(ResyncAttempt {
            id: self.id,
            sync_started_at: self.sync_started_at,
            sync_finished_at: self.sync_finished_at,
            sync_status: enum_from_db(&self.sync_status)?,
            sync_tasks_status: enum_from_db(&self.sync_tasks_status)?,
            stale: self.stale != 0,
        })
    }
}
