use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::*;
use crate::config::{ClientKind, CompensationFailurePolicy};
use crate::errors::{DatabaseError, Error, ReplicationError, Result};
use crate::replication::{DataType, NewTask, ReplicationState, Task, TaskType};

#[derive(Clone, Default)]
struct MemoryState {
    resources: BTreeMap<(DataType, String), Resource>,
    tasks: Vec<Task>,
    next_task_id: i64,
    readonly: bool,
}

/// In-memory store: each transaction works on a copy that replaces the
/// committed state only when the job succeeds.
#[derive(Default)]
struct MemoryStateStore {
    state: Mutex<MemoryState>,
    calls: AtomicU32,
    contended_calls: Mutex<HashSet<u32>>,
}

impl MemoryStateStore {
    fn contend_on(&self, calls: &[u32]) {
        self.contended_calls.lock().unwrap().extend(calls);
    }

    fn set_readonly(&self, readonly: bool) {
        self.state.lock().unwrap().readonly = readonly;
    }

    fn tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    fn seed(&self, data_type: DataType, id: &str, data: Value) {
        let mut state = self.state.lock().unwrap();
        state.resources.insert(
            (data_type, id.to_string()),
            Resource {
                data_type,
                id: id.to_string(),
                data,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                updated_at: "2026-01-01T00:00:00Z".to_string(),
            },
        );
    }
}

struct MemoryTx {
    state: MemoryState,
    transaction_id: String,
}

impl StoreTx for MemoryTx {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    fn replication_state(&mut self) -> Result<ReplicationState> {
        Ok(ReplicationState {
            last_processed_task_id: None,
            active_version: None,
            readonly: self.state.readonly,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        })
    }

    fn load_resource(&mut self, data_type: DataType, id: &str) -> Result<Option<Resource>> {
        Ok(self
            .state
            .resources
            .get(&(data_type, id.to_string()))
            .cloned())
    }

    fn insert_resource(&mut self, data_type: DataType, id: &str, data: &Value) -> Result<Resource> {
        let key = (data_type, id.to_string());
        if self.state.resources.contains_key(&key) {
            return Err(DatabaseError::UniqueViolation(format!("{data_type} {id}")).into());
        }
        let resource = Resource {
            data_type,
            id: id.to_string(),
            data: data.clone(),
            created_at: "2026-01-02T00:00:00Z".to_string(),
            updated_at: "2026-01-02T00:00:00Z".to_string(),
        };
        self.state.resources.insert(key, resource.clone());
        Ok(resource)
    }

    fn replace_resource(
        &mut self,
        data_type: DataType,
        id: &str,
        data: &Value,
    ) -> Result<Resource> {
        let resource = self
            .state
            .resources
            .get_mut(&(data_type, id.to_string()))
            .ok_or_else(|| Error::not_found(format!("{data_type} {id}")))?;
        resource.data = data.clone();
        resource.updated_at = "2026-01-03T00:00:00Z".to_string();
        Ok(resource.clone())
    }

    fn delete_resource(&mut self, data_type: DataType, id: &str) -> Result<bool> {
        Ok(self
            .state
            .resources
            .remove(&(data_type, id.to_string()))
            .is_some())
    }

    fn append_task(&mut self, task: NewTask) -> Result<i64> {
        self.state.next_task_id += 1;
        let id = self.state.next_task_id;
        self.state.tasks.push(Task {
            id,
            task_type: task.task_type,
            data_type: task.data_type,
            resource_id: task.resource_id,
            data: task.data,
            transaction_id: self.transaction_id.clone(),
            created_at: "2026-01-02T00:00:00Z".to_string(),
        });
        Ok(id)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn transaction<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn StoreTx) -> Result<T> + Send + 'static,
    {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.contended_calls.lock().unwrap().contains(&call) {
            return Err(DatabaseError::LocalContention("database is locked".into()).into());
        }
        let mut tx = MemoryTx {
            state: self.state.lock().unwrap().clone(),
            transaction_id: format!("tx-{call}"),
        };
        let value = job(&mut tx)?;
        *self.state.lock().unwrap() = tx.state;
        Ok(value)
    }

    fn get_resource(&self, data_type: DataType, id: &str) -> Result<Option<Resource>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .resources
            .get(&(data_type, id.to_string()))
            .cloned())
    }

    fn list_resources(&self, data_type: DataType) -> Result<Vec<Resource>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .resources
            .values()
            .filter(|r| r.data_type == data_type)
            .cloned()
            .collect())
    }
}

/// Task-log local hook with a remote side that always fails.
struct FailingRemoteHooks {
    typed_error: bool,
}

#[async_trait]
impl MutationHooks for FailingRemoteHooks {
    fn kind(&self) -> ClientKind {
        ClientKind::DirectRest
    }

    fn local(&self, tx: &mut dyn StoreTx, applied: &AppliedMutation) -> Result<Option<i64>> {
        TaskLogHooks.local(tx, applied)
    }

    async fn remote(&self, applied: &AppliedMutation) -> Result<()> {
        if self.typed_error {
            Err(remote_apply_failed(applied, "backend returned 503"))
        } else {
            Err(Error::validation("connection reset"))
        }
    }
}

/// Local hook that always refuses.
struct RejectingLocalHooks;

#[async_trait]
impl MutationHooks for RejectingLocalHooks {
    fn kind(&self) -> ClientKind {
        ClientKind::TaskLog
    }

    fn local(&self, _tx: &mut dyn StoreTx, _applied: &AppliedMutation) -> Result<Option<i64>> {
        Err(DatabaseError::QueryFailed("no such table: tasks".into()).into())
    }

    async fn remote(&self, _applied: &AppliedMutation) -> Result<()> {
        Ok(())
    }
}

fn orchestrator(
    store: &Arc<MemoryStateStore>,
    hooks: Arc<dyn MutationHooks>,
) -> MutationOrchestrator<MemoryStateStore> {
    MutationOrchestrator::new(store.clone(), hooks)
        .with_retry_policy(RetryPolicy::new(3, Duration::ZERO))
}

fn failing(store: &Arc<MemoryStateStore>) -> MutationOrchestrator<MemoryStateStore> {
    orchestrator(store, Arc::new(FailingRemoteHooks { typed_error: true }))
}

#[tokio::test]
async fn create_appends_one_task_in_the_same_transaction() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let outcome = orchestrator
        .create(DataType::Network, json!({ "id": "net-1", "name": "public" }))
        .await
        .unwrap();

    assert_eq!(outcome.phase, MutationPhase::RemoteOk);
    assert_eq!(outcome.resource_id, "net-1");
    assert_eq!(outcome.task_id, Some(1));
    let tasks = store.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Create);
    assert_eq!(tasks[0].data_type, DataType::Network);
    assert_eq!(tasks[0].transaction_id, outcome.transaction_id);
    assert_eq!(
        tasks[0].data,
        Some(json!({ "id": "net-1", "name": "public" }))
    );
}

#[tokio::test]
async fn create_without_id_generates_one() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let outcome = orchestrator
        .create(DataType::Router, json!({ "name": "edge" }))
        .await
        .unwrap();

    let resource = outcome.resource.unwrap();
    assert!(!resource.id.is_empty());
    assert_eq!(resource.data["id"], json!(resource.id));
}

#[tokio::test]
async fn update_merges_and_delete_removes() {
    let store = Arc::new(MemoryStateStore::default());
    store.seed(DataType::Port, "p1", json!({ "id": "p1", "mac": "aa", "up": true }));
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let updated = orchestrator
        .update(DataType::Port, "p1", json!({ "up": false }))
        .await
        .unwrap();
    assert_eq!(
        updated.resource.unwrap().data,
        json!({ "id": "p1", "mac": "aa", "up": false })
    );

    let deleted = orchestrator.delete(DataType::Port, "p1").await.unwrap();
    assert!(deleted.resource.is_none());
    assert!(orchestrator.get_resource(DataType::Port, "p1").unwrap().is_none());

    let types: Vec<TaskType> = store.tasks().iter().map(|t| t.task_type).collect();
    assert_eq!(types, vec![TaskType::Update, TaskType::Delete]);
    assert!(store.tasks()[1].data.is_none());
}

#[tokio::test]
async fn readonly_gate_refuses_then_reopens() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    store.set_readonly(true);
    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    assert!(err.is_read_only());
    assert!(store.tasks().is_empty());
    assert!(orchestrator.list_resources(DataType::Network).unwrap().is_empty());

    store.set_readonly(false);
    orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap();
    assert_eq!(store.tasks().len(), 1);
}

#[tokio::test]
async fn remote_failure_on_create_compensates_with_delete() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = failing(&store);

    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-x" }))
        .await
        .unwrap_err();

    match err {
        Error::Replication(ReplicationError::RemoteApplyFailed {
            data_type,
            resource_id,
            operation,
            message,
            compensation_error,
        }) => {
            assert_eq!(data_type, DataType::Network);
            assert_eq!(resource_id, "net-x");
            assert_eq!(operation, Operation::Create);
            assert_eq!(message, "backend returned 503");
            assert!(compensation_error.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(orchestrator
        .get_resource(DataType::Network, "net-x")
        .unwrap()
        .is_none());

    let tasks = store.tasks();
    let types: Vec<TaskType> = tasks.iter().map(|t| t.task_type).collect();
    assert_eq!(types, vec![TaskType::Create, TaskType::Delete]);
    assert_ne!(tasks[0].transaction_id, tasks[1].transaction_id);
}

#[tokio::test]
async fn untyped_remote_error_is_wrapped() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(FailingRemoteHooks { typed_error: false }));

    let err = orchestrator
        .create(DataType::Subnet, json!({ "id": "s1" }))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Replication(ReplicationError::RemoteApplyFailed { ref message, .. })
            if message.contains("connection reset")
    ));
}

#[tokio::test]
async fn remote_failure_on_update_restores_previous_body() {
    let store = Arc::new(MemoryStateStore::default());
    store.seed(DataType::Router, "r1", json!({ "id": "r1", "name": "old" }));
    let orchestrator = failing(&store);

    orchestrator
        .update(DataType::Router, "r1", json!({ "name": "new" }))
        .await
        .unwrap_err();

    let restored = orchestrator.get_resource(DataType::Router, "r1").unwrap().unwrap();
    assert_eq!(restored.data, json!({ "id": "r1", "name": "old" }));
    let tasks = store.tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].task_type, TaskType::Update);
    assert_eq!(tasks[1].data, Some(json!({ "id": "r1", "name": "old" })));
}

#[tokio::test]
async fn remote_failure_on_delete_reinserts() {
    let store = Arc::new(MemoryStateStore::default());
    store.seed(DataType::FloatingIp, "fip-1", json!({ "id": "fip-1", "address": "10.0.0.9" }));
    let orchestrator = failing(&store);

    orchestrator
        .delete(DataType::FloatingIp, "fip-1")
        .await
        .unwrap_err();

    let back = orchestrator
        .get_resource(DataType::FloatingIp, "fip-1")
        .unwrap()
        .unwrap();
    assert_eq!(back.data["address"], json!("10.0.0.9"));
    let types: Vec<TaskType> = store.tasks().iter().map(|t| t.task_type).collect();
    assert_eq!(types, vec![TaskType::Delete, TaskType::Create]);
}

#[tokio::test]
async fn local_hook_failure_rolls_back_resource_write() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(RejectingLocalHooks));

    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(DatabaseError::QueryFailed(_))));
    assert!(orchestrator.get_resource(DataType::Network, "net-1").unwrap().is_none());
}

#[tokio::test]
async fn local_contention_is_retried() {
    let store = Arc::new(MemoryStateStore::default());
    store.contend_on(&[1, 2]);
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let outcome = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap();
    assert_eq!(outcome.transaction_id, "tx-3");
    assert_eq!(store.tasks().len(), 1);
}

#[tokio::test]
async fn contention_beyond_attempts_is_surfaced() {
    let store = Arc::new(MemoryStateStore::default());
    store.contend_on(&[1, 2, 3]);
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    assert!(err.is_contention());
    assert!(store.tasks().is_empty());
}

#[tokio::test]
async fn compensation_failure_is_swallowed_by_default() {
    let store = Arc::new(MemoryStateStore::default());
    // Call 1 is the local phase; calls 2..=4 are every compensation attempt.
    store.contend_on(&[2, 3, 4]);
    let orchestrator = failing(&store);

    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Replication(ReplicationError::RemoteApplyFailed {
            compensation_error: None,
            ..
        })
    ));
    // Compensation never committed, so the row is still there.
    assert!(orchestrator.get_resource(DataType::Network, "net-1").unwrap().is_some());
}

#[tokio::test]
async fn compensation_failure_can_be_attached() {
    let store = Arc::new(MemoryStateStore::default());
    store.contend_on(&[2, 3, 4]);
    let orchestrator = failing(&store).with_compensation_policy(CompensationFailurePolicy::Attach);

    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    match err {
        Error::Replication(ReplicationError::RemoteApplyFailed {
            compensation_error: Some(message),
            ..
        }) => assert!(message.contains("database is locked")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn compensation_bypasses_readonly_gate() {
    struct ReadonlyAfterCommit {
        store: Arc<MemoryStateStore>,
    }

    #[async_trait]
    impl MutationHooks for ReadonlyAfterCommit {
        fn kind(&self) -> ClientKind {
            ClientKind::DirectRest
        }

        fn local(&self, tx: &mut dyn StoreTx, applied: &AppliedMutation) -> Result<Option<i64>> {
            TaskLogHooks.local(tx, applied)
        }

        async fn remote(&self, applied: &AppliedMutation) -> Result<()> {
            self.store.set_readonly(true);
            Err(remote_apply_failed(applied, "backend returned 500"))
        }
    }

    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(
        &store,
        Arc::new(ReadonlyAfterCommit {
            store: store.clone(),
        }),
    );

    orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    assert!(orchestrator.get_resource(DataType::Network, "net-1").unwrap().is_none());
}

#[tokio::test]
async fn update_of_missing_resource_is_not_found() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let err = orchestrator
        .update(DataType::Network, "ghost", json!({ "name": "x" }))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(store.tasks().is_empty());
}

#[tokio::test]
async fn update_cannot_change_id() {
    let store = Arc::new(MemoryStateStore::default());
    store.seed(DataType::Network, "net-1", json!({ "id": "net-1" }));
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let err = orchestrator
        .update(DataType::Network, "net-1", json!({ "id": "net-2" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn non_object_payload_is_rejected() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let err = orchestrator
        .create(DataType::Network, json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn unregistered_type_is_rejected() {
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks))
        .with_handlers(HandlerRegistry::new());

    let err = orchestrator
        .create(DataType::Network, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn duplicate_create_surfaces_unique_violation() {
    let store = Arc::new(MemoryStateStore::default());
    store.seed(DataType::Network, "net-1", json!({ "id": "net-1" }));
    let orchestrator = orchestrator(&store, Arc::new(TaskLogHooks));

    let err = orchestrator
        .create(DataType::Network, json!({ "id": "net-1" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(DatabaseError::UniqueViolation(_))));
}
