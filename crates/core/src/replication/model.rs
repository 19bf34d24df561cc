//! Replication domain models: tasks, the replication state singleton and
//! resync attempts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource types with a backing table, in the fixed order a resync
/// snapshots them. Parents come before the resources that reference them.
pub const RESYNC_ORDER: [DataType; 12] = [
    DataType::Network,
    DataType::Subnet,
    DataType::SecurityGroup,
    DataType::SecurityGroupRule,
    DataType::Port,
    DataType::PortBinding,
    DataType::Router,
    DataType::FloatingIp,
    DataType::Pool,
    DataType::HealthMonitor,
    DataType::Vip,
    DataType::Member,
];

/// Kind of mutation a task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Create,
    Update,
    Delete,
    /// Discard everything before this row; a full baseline follows.
    Flush,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Create => "CREATE",
            TaskType::Update => "UPDATE",
            TaskType::Delete => "DELETE",
            TaskType::Flush => "FLUSH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(TaskType::Create),
            "UPDATE" => Some(TaskType::Update),
            "DELETE" => Some(TaskType::Delete),
            "FLUSH" => Some(TaskType::Flush),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource kind tag carried by every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Network,
    Subnet,
    Port,
    Router,
    FloatingIp,
    SecurityGroup,
    SecurityGroupRule,
    Pool,
    Vip,
    HealthMonitor,
    Member,
    PortBinding,
    /// Control records with no resource table (FLUSH sentinels).
    Config,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Network => "NETWORK",
            DataType::Subnet => "SUBNET",
            DataType::Port => "PORT",
            DataType::Router => "ROUTER",
            DataType::FloatingIp => "FLOATING_IP",
            DataType::SecurityGroup => "SECURITY_GROUP",
            DataType::SecurityGroupRule => "SECURITY_GROUP_RULE",
            DataType::Pool => "POOL",
            DataType::Vip => "VIP",
            DataType::HealthMonitor => "HEALTH_MONITOR",
            DataType::Member => "MEMBER",
            DataType::PortBinding => "PORT_BINDING",
            DataType::Config => "CONFIG",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NETWORK" => Some(DataType::Network),
            "SUBNET" => Some(DataType::Subnet),
            "PORT" => Some(DataType::Port),
            "ROUTER" => Some(DataType::Router),
            "FLOATING_IP" => Some(DataType::FloatingIp),
            "SECURITY_GROUP" => Some(DataType::SecurityGroup),
            "SECURITY_GROUP_RULE" => Some(DataType::SecurityGroupRule),
            "POOL" => Some(DataType::Pool),
            "VIP" => Some(DataType::Vip),
            "HEALTH_MONITOR" => Some(DataType::HealthMonitor),
            "MEMBER" => Some(DataType::Member),
            "PORT_BINDING" => Some(DataType::PortBinding),
            "CONFIG" => Some(DataType::Config),
            _ => None,
        }
    }

    /// Backing resource table, `None` for control-only types.
    pub fn table_name(&self) -> Option<&'static str> {
        match self {
            DataType::Network => Some("networks"),
            DataType::Subnet => Some("subnets"),
            DataType::Port => Some("ports"),
            DataType::Router => Some("routers"),
            DataType::FloatingIp => Some("floating_ips"),
            DataType::SecurityGroup => Some("security_groups"),
            DataType::SecurityGroupRule => Some("security_group_rules"),
            DataType::Pool => Some("lb_pools"),
            DataType::Vip => Some("lb_vips"),
            DataType::HealthMonitor => Some("lb_health_monitors"),
            DataType::Member => Some("lb_members"),
            DataType::PortBinding => Some("port_bindings"),
            DataType::Config => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replication record, as read back from the task log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub task_type: TaskType,
    pub data_type: DataType,
    pub resource_id: Option<String>,
    pub data: Option<serde_json::Value>,
    pub transaction_id: String,
    pub created_at: String,
}

/// A task to append. The id, correlator and timestamp are assigned by the
/// store at insert time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub data_type: DataType,
    pub resource_id: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl NewTask {
    pub fn create(
        data_type: DataType,
        resource_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            task_type: TaskType::Create,
            data_type,
            resource_id: Some(resource_id.into()),
            data: Some(data),
        }
    }

    pub fn update(
        data_type: DataType,
        resource_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            task_type: TaskType::Update,
            data_type,
            resource_id: Some(resource_id.into()),
            data: Some(data),
        }
    }

    pub fn delete(data_type: DataType, resource_id: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::Delete,
            data_type,
            resource_id: Some(resource_id.into()),
            data: None,
        }
    }

    pub fn flush() -> Self {
        Self {
            task_type: TaskType::Flush,
            data_type: DataType::Config,
            resource_id: None,
            data: None,
        }
    }
}

/// The replication state singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationState {
    /// Last task id the external consumer is known to have applied.
    pub last_processed_task_id: Option<i64>,
    /// Resync attempt whose baseline is currently live.
    pub active_version: Option<i64>,
    pub readonly: bool,
    pub updated_at: String,
}

/// Lifecycle status of a resync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Started,
    Completed,
    Error,
    Aborted,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Started => "STARTED",
            SyncStatus::Completed => "COMPLETED",
            SyncStatus::Error => "ERROR",
            SyncStatus::Aborted => "ABORTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTED" => Some(SyncStatus::Started),
            "COMPLETED" => Some(SyncStatus::Completed),
            "ERROR" => Some(SyncStatus::Error),
            "ABORTED" => Some(SyncStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Started)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the resync attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncAttempt {
    pub id: i64,
    pub sync_started_at: String,
    pub sync_finished_at: Option<String>,
    /// Outcome of the attempt as a whole.
    pub sync_status: SyncStatus,
    /// Outcome of the task log swap. `ABORTED` when the swap never ran.
    pub sync_tasks_status: SyncStatus,
    /// Superseded by a later completed attempt.
    pub stale: bool,
}

/// Fencing token taken while the snapshot lock is held.
///
/// The row count alone misses a delete-then-insert pair in the unlocked gap;
/// the AUTOINCREMENT high-water id moves on every insert and closes that gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FencingToken {
    pub row_count: i64,
    pub high_water_id: i64,
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows={} high_water={}", self.row_count, self.high_water_id)
    }
}

/// One resource captured by a resync snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub data_type: DataType,
    pub resource_id: String,
    pub data: serde_json::Value,
}

/// Output of the snapshot phase of a resync.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub entries: Vec<SnapshotEntry>,
    pub fence: FencingToken,
}

/// Result of swapping a baseline into the task log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSummary {
    pub flush_task_id: i64,
    pub tasks_created: usize,
}

/// Aggregate counters over the task log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogStats {
    pub row_count: i64,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
}
