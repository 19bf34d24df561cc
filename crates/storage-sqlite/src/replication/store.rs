//! `StateStore` over SQLite: mutation transactions run on the writer actor.

use async_trait::async_trait;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use netplane_core::errors::Result;
use netplane_core::mutation::{Resource, StateStore, StoreTx};
use netplane_core::replication::{DataType, NewTask, ReplicationState};

use super::repository::{append_task, load_state};
use super::resources;
use crate::db::{get_connection, WriteHandle};

pub struct SqliteStateStore {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SqliteStateStore {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

/// One writer-actor transaction, tagged with a fresh correlator.
struct SqliteStoreTx<'a> {
    conn: &'a mut SqliteConnection,
    transaction_id: String,
}

impl StoreTx for SqliteStoreTx<'_> {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    fn replication_state(&mut self) -> Result<ReplicationState> {
        load_state(self.conn)
    }

    fn load_resource(&mut self, data_type: DataType, id: &str) -> Result<Option<Resource>> {
        resources::load_resource(self.conn, data_type, id)
    }

    fn insert_resource(
        &mut self,
        data_type: DataType,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Resource> {
        resources::insert_resource(self.conn, data_type, id, data)
    }

    fn replace_resource(
        &mut self,
        data_type: DataType,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Resource> {
        resources::replace_resource(self.conn, data_type, id, data)
    }

    fn delete_resource(&mut self, data_type: DataType, id: &str) -> Result<bool> {
        resources::delete_resource(self.conn, data_type, id)
    }

    fn append_task(&mut self, task: NewTask) -> Result<i64> {
        append_task(self.conn, task, &self.transaction_id)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn transaction<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn StoreTx) -> Result<T> + Send + 'static,
    {
        self.writer
            .exec(move |conn| {
                let mut tx = SqliteStoreTx {
                    conn,
                    transaction_id: Uuid::now_v7().to_string(),
                };
                job(&mut tx)
            })
            .await
    }

    fn get_resource(&self, data_type: DataType, id: &str) -> Result<Option<Resource>> {
        let mut conn = get_connection(&self.pool)?;
        resources::load_resource(&mut conn, data_type, id)
    }

    fn list_resources(&self, data_type: DataType) -> Result<Vec<Resource>> {
        let mut conn = get_connection(&self.pool)?;
        resources::list_resources(&mut conn, data_type)
    }
}
