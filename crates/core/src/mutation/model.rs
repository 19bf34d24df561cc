//! Mutation request/outcome models and the compensation descriptor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::replication::{DataType, NewTask, TaskType};

/// Resource operation requested by an upstream caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Operation::Create => TaskType::Create,
            Operation::Update => TaskType::Update,
            Operation::Delete => TaskType::Delete,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored resource row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub data_type: DataType,
    pub id: String,
    pub data: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationTarget {
    Create { payload: serde_json::Value },
    Update { id: String, payload: serde_json::Value },
    Delete { id: String },
}

/// Upstream mutation request.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub data_type: DataType,
    pub target: MutationTarget,
    pub correlation_id: Option<String>,
}

impl MutationRequest {
    pub fn create(data_type: DataType, payload: serde_json::Value) -> Self {
        Self {
            data_type,
            target: MutationTarget::Create { payload },
            correlation_id: None,
        }
    }

    pub fn update(data_type: DataType, id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            data_type,
            target: MutationTarget::Update {
                id: id.into(),
                payload,
            },
            correlation_id: None,
        }
    }

    pub fn delete(data_type: DataType, id: impl Into<String>) -> Self {
        Self {
            data_type,
            target: MutationTarget::Delete { id: id.into() },
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn operation(&self) -> Operation {
        match self.target {
            MutationTarget::Create { .. } => Operation::Create,
            MutationTarget::Update { .. } => Operation::Update,
            MutationTarget::Delete { .. } => Operation::Delete,
        }
    }
}

/// What the local phase committed; handed to both hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    pub data_type: DataType,
    pub operation: Operation,
    pub resource_id: String,
    /// State after the mutation; `None` after a delete.
    pub resource: Option<Resource>,
    pub correlation_id: Option<String>,
}

impl AppliedMutation {
    /// The task this mutation contributes to the task log.
    pub fn to_task(&self) -> NewTask {
        match (self.operation, &self.resource) {
            (Operation::Create, Some(resource)) => {
                NewTask::create(self.data_type, &self.resource_id, resource.data.clone())
            }
            (Operation::Update, Some(resource)) => {
                NewTask::update(self.data_type, &self.resource_id, resource.data.clone())
            }
            _ => NewTask::delete(self.data_type, &self.resource_id),
        }
    }
}

/// Inverse of a committed local mutation, declared during the local phase and
/// executed only if the remote phase fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Compensation {
    /// Undo a create.
    Delete {
        data_type: DataType,
        resource_id: String,
    },
    /// Undo an update by putting the previous body back.
    Restore {
        data_type: DataType,
        resource_id: String,
        data: serde_json::Value,
    },
    /// Undo a delete.
    Reinsert {
        data_type: DataType,
        resource_id: String,
        data: serde_json::Value,
    },
}

impl Compensation {
    pub fn operation(&self) -> Operation {
        match self {
            Compensation::Delete { .. } => Operation::Delete,
            Compensation::Restore { .. } => Operation::Update,
            Compensation::Reinsert { .. } => Operation::Create,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Compensation::Delete { data_type, .. }
            | Compensation::Restore { data_type, .. }
            | Compensation::Reinsert { data_type, .. } => *data_type,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Compensation::Delete { resource_id, .. }
            | Compensation::Restore { resource_id, .. }
            | Compensation::Reinsert { resource_id, .. } => resource_id,
        }
    }
}

/// Per-mutation protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    PendingLocal,
    LocalCommitted,
    RemoteOk,
    RemoteFailed,
    Compensating,
    Compensated,
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            MutationPhase::PendingLocal => "PENDING_LOCAL",
            MutationPhase::LocalCommitted => "LOCAL_COMMITTED",
            MutationPhase::RemoteOk => "REMOTE_OK",
            MutationPhase::RemoteFailed => "REMOTE_FAILED",
            MutationPhase::Compensating => "COMPENSATING",
            MutationPhase::Compensated => "COMPENSATED",
        };
        f.write_str(value)
    }
}

/// Result of a mutation that reached `REMOTE_OK`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub data_type: DataType,
    pub operation: Operation,
    pub resource_id: String,
    /// Persisted representation for create/update.
    pub resource: Option<Resource>,
    /// Task appended by the local hook, if any.
    pub task_id: Option<i64>,
    pub transaction_id: String,
    pub phase: MutationPhase,
}
