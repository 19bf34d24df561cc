//! Materialized view of the task log: the net effect of every row.

use std::collections::BTreeMap;

use log::warn;

use super::model::{DataType, Task, TaskType};
use super::pager::TaskPager;
use super::traits::TaskLogRepositoryTrait;
use crate::errors::Result;

/// Net state per `(data_type, resource_id)`.
pub type MaterializedState = BTreeMap<(DataType, String), serde_json::Value>;

/// Applies one task on top of `state`. Tasks must be fed in `id` order.
pub fn apply_task(state: &mut MaterializedState, task: &Task) {
    match task.task_type {
        TaskType::Flush => state.clear(),
        TaskType::Create | TaskType::Update => {
            let (Some(resource_id), Some(data)) = (&task.resource_id, &task.data) else {
                warn!(
                    "[TaskLog] Skipping {} task {} without resource id or data",
                    task.task_type, task.id
                );
                return;
            };
            state.insert((task.data_type, resource_id.clone()), data.clone());
        }
        TaskType::Delete => {
            if let Some(resource_id) = &task.resource_id {
                state.remove(&(task.data_type, resource_id.clone()));
            }
        }
    }
}

/// Folds an ordered task sequence into its net state.
pub fn materialize<'a, I>(tasks: I) -> MaterializedState
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut state = MaterializedState::new();
    for task in tasks {
        apply_task(&mut state, task);
    }
    state
}

/// `current_state()` of the task log, read through a pager.
pub fn current_state(
    repository: &dyn TaskLogRepositoryTrait,
    page_size: i64,
) -> Result<MaterializedState> {
    let mut state = MaterializedState::new();
    for task in TaskPager::new(repository, None, page_size) {
        apply_task(&mut state, &task?);
    }
    Ok(state)
}
