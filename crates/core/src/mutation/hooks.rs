use async_trait::async_trait;
use log::debug;

use super::model::AppliedMutation;
use super::store::StoreTx;
use crate::config::ClientKind;
use crate::errors::Result;

/// Backend-facing side effects of a mutation.
///
/// `local` runs inside the mutation's transaction and can abort it. `remote`
/// runs after commit; an error there triggers compensation.
#[async_trait]
pub trait MutationHooks: Send + Sync {
    fn kind(&self) -> ClientKind;

    /// Returns the id of the task appended, if any.
    fn local(&self, tx: &mut dyn StoreTx, applied: &AppliedMutation) -> Result<Option<i64>>;

    async fn remote(&self, applied: &AppliedMutation) -> Result<()>;
}

/// Appends one task per mutation; the external consumer does the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskLogHooks;

#[async_trait]
impl MutationHooks for TaskLogHooks {
    fn kind(&self) -> ClientKind {
        ClientKind::TaskLog
    }

    fn local(&self, tx: &mut dyn StoreTx, applied: &AppliedMutation) -> Result<Option<i64>> {
        let task_id = tx.append_task(applied.to_task())?;
        debug!(
            "[TaskLog] Appended task {} ({} {}/{}) in {}",
            task_id,
            applied.operation,
            applied.data_type,
            applied.resource_id,
            tx.transaction_id()
        );
        Ok(Some(task_id))
    }

    async fn remote(&self, _applied: &AppliedMutation) -> Result<()> {
        Ok(())
    }
}
