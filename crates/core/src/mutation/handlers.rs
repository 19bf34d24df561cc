//! Per-resource-type write handlers and the dispatch table that selects them.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::model::Resource;
use super::store::StoreTx;
use crate::errors::{Error, Result};
use crate::replication::{DataType, RESYNC_ORDER};

/// Writes one resource type inside the local transaction.
///
/// The orchestrator loads the existing row for update and delete, so handlers
/// never see a missing target.
pub trait ResourceHandler: Send + Sync {
    fn data_type(&self) -> DataType;

    fn create(&self, tx: &mut dyn StoreTx, payload: Value) -> Result<Resource>;

    fn update(
        &self,
        tx: &mut dyn StoreTx,
        existing: &Resource,
        payload: Value,
    ) -> Result<Resource>;

    fn delete(&self, tx: &mut dyn StoreTx, existing: &Resource) -> Result<()>;
}

/// Stores the request body as the resource document.
///
/// Create takes `id` from the payload or generates one. Update merges top-level
/// keys into the stored document; `id` cannot change.
pub struct JsonResourceHandler {
    data_type: DataType,
}

impl JsonResourceHandler {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

fn into_object(data_type: DataType, payload: Value) -> Result<Map<String, Value>> {
    match payload {
        Value::Object(map) => Ok(map),
        other => Err(Error::validation(format!(
            "{data_type} payload must be a JSON object, got {other}"
        ))),
    }
}

impl ResourceHandler for JsonResourceHandler {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn create(&self, tx: &mut dyn StoreTx, payload: Value) -> Result<Resource> {
        let mut body = into_object(self.data_type, payload)?;
        let id = match body.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::String(_)) | None | Some(Value::Null) => Uuid::new_v4().to_string(),
            Some(other) => {
                return Err(Error::validation(format!(
                    "{} id must be a string, got {other}",
                    self.data_type
                )))
            }
        };
        body.insert("id".to_string(), Value::String(id.clone()));
        tx.insert_resource(self.data_type, &id, &Value::Object(body))
    }

    fn update(
        &self,
        tx: &mut dyn StoreTx,
        existing: &Resource,
        payload: Value,
    ) -> Result<Resource> {
        let changes = into_object(self.data_type, payload)?;
        if let Some(id) = changes.get("id") {
            if id.as_str() != Some(existing.id.as_str()) {
                return Err(Error::validation(format!(
                    "{} id is immutable ({} -> {id})",
                    self.data_type, existing.id
                )));
            }
        }
        let mut body = match &existing.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        body.extend(changes);
        body.insert("id".to_string(), Value::String(existing.id.clone()));
        tx.replace_resource(self.data_type, &existing.id, &Value::Object(body))
    }

    fn delete(&self, tx: &mut dyn StoreTx, existing: &Resource) -> Result<()> {
        if !tx.delete_resource(self.data_type, &existing.id)? {
            return Err(Error::not_found(format!("{} {}", self.data_type, existing.id)));
        }
        Ok(())
    }
}

/// Dispatch table from data type to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<DataType, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `JsonResourceHandler` for every resource type with a table.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for data_type in RESYNC_ORDER {
            registry.register(Arc::new(JsonResourceHandler::new(data_type)));
        }
        registry
    }

    /// Registers `handler`, replacing any previous handler for its type.
    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(handler.data_type(), handler);
    }

    pub fn get(&self, data_type: DataType) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(&data_type).cloned()
    }

    pub fn data_types(&self) -> Vec<DataType> {
        let mut types: Vec<DataType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
