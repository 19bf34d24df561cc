//! Name-addressed access to the resource tables. Every table shares the
//! `(id, data, created_at, updated_at)` layout, so one set of statements
//! serves all of them.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::sqlite::SqliteConnection;

use netplane_core::errors::{Error, Result};
use netplane_core::mutation::Resource;
use netplane_core::replication::{DataType, SnapshotEntry};

use super::{parse_json_column, quote_identifier};
use crate::errors::StorageError;

#[derive(diesel::QueryableByName)]
struct ResourceRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    data: String,
    #[diesel(sql_type = Text)]
    created_at: String,
    #[diesel(sql_type = Text)]
    updated_at: String,
}

impl ResourceRow {
    fn into_resource(self, data_type: DataType) -> Result<Resource> {
        Ok(Resource {
            data_type,
            id: self.id,
            data: parse_json_column(&self.data)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn table_for(data_type: DataType) -> Result<String> {
    data_type
        .table_name()
        .map(quote_identifier)
        .ok_or_else(|| Error::validation(format!("{data_type} has no resource table")))
}

pub(crate) fn load_resource(
    conn: &mut SqliteConnection,
    data_type: DataType,
    id: &str,
) -> Result<Option<Resource>> {
    let sql = format!(
        "SELECT id, data, created_at, updated_at FROM {} WHERE id = ?",
        table_for(data_type)?
    );
    diesel::sql_query(sql)
        .bind::<Text, _>(id)
        .get_result::<ResourceRow>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(|row| row.into_resource(data_type))
        .transpose()
}

/// Rows in insertion (rowid) order.
pub(crate) fn list_resources(
    conn: &mut SqliteConnection,
    data_type: DataType,
) -> Result<Vec<Resource>> {
    let sql = format!(
        "SELECT id, data, created_at, updated_at FROM {} ORDER BY rowid",
        table_for(data_type)?
    );
    diesel::sql_query(sql)
        .load::<ResourceRow>(conn)
        .map_err(StorageError::from)?
        .into_iter()
        .map(|row| row.into_resource(data_type))
        .collect()
}

pub(crate) fn insert_resource(
    conn: &mut SqliteConnection,
    data_type: DataType,
    id: &str,
    data: &serde_json::Value,
) -> Result<Resource> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO {} (id, data, created_at, updated_at) VALUES (?, ?, ?, ?)",
        table_for(data_type)?
    );
    diesel::sql_query(sql)
        .bind::<Text, _>(id)
        .bind::<Text, _>(serde_json::to_string(data)?)
        .bind::<Text, _>(&now)
        .bind::<Text, _>(&now)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(Resource {
        data_type,
        id: id.to_string(),
        data: data.clone(),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub(crate) fn replace_resource(
    conn: &mut SqliteConnection,
    data_type: DataType,
    id: &str,
    data: &serde_json::Value,
) -> Result<Resource> {
    let sql = format!(
        "UPDATE {} SET data = ?, updated_at = ? WHERE id = ?",
        table_for(data_type)?
    );
    let updated = diesel::sql_query(sql)
        .bind::<Text, _>(serde_json::to_string(data)?)
        .bind::<Text, _>(Utc::now().to_rfc3339())
        .bind::<Text, _>(id)
        .execute(conn)
        .map_err(StorageError::from)?;
    if updated == 0 {
        return Err(Error::not_found(format!("{data_type} {id}")));
    }
    load_resource(conn, data_type, id)?
        .ok_or_else(|| Error::not_found(format!("{data_type} {id}")))
}

pub(crate) fn delete_resource(
    conn: &mut SqliteConnection,
    data_type: DataType,
    id: &str,
) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?", table_for(data_type)?);
    let deleted = diesel::sql_query(sql)
        .bind::<Text, _>(id)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(deleted > 0)
}

/// Reads the given tables in `order`, each in insertion order.
pub(crate) fn snapshot_entries(
    conn: &mut SqliteConnection,
    order: &[DataType],
) -> Result<Vec<SnapshotEntry>> {
    let mut entries = Vec::new();
    for data_type in order {
        for resource in list_resources(conn, *data_type)? {
            entries.push(SnapshotEntry {
                data_type: resource.data_type,
                resource_id: resource.id,
                data: resource.data,
            });
        }
    }
    Ok(entries)
}
