//! Two-phase mutation protocol: a local transaction that writes the resource
//! and runs the local hook, then the remote hook after commit, with a
//! compensating transaction when the remote side fails.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;

use super::handlers::{HandlerRegistry, ResourceHandler};
use super::hooks::MutationHooks;
use super::model::{
    AppliedMutation, Compensation, MutationOutcome, MutationPhase, MutationRequest,
    MutationTarget, Resource,
};
use super::retry::RetryPolicy;
use super::store::{StateStore, StoreTx};
use crate::config::{CompensationFailurePolicy, ReplicationConfig};
use crate::errors::{Error, ReplicationError, Result};
use crate::replication::DataType;

/// What the local phase committed and how to take it back.
struct LocalCommit {
    applied: AppliedMutation,
    compensation: Compensation,
    task_id: Option<i64>,
    transaction_id: String,
}

pub struct MutationOrchestrator<S: StateStore> {
    store: Arc<S>,
    handlers: HandlerRegistry,
    hooks: Arc<dyn MutationHooks>,
    retry: RetryPolicy,
    compensation_policy: CompensationFailurePolicy,
}

impl<S: StateStore> MutationOrchestrator<S> {
    pub fn new(store: Arc<S>, hooks: Arc<dyn MutationHooks>) -> Self {
        Self {
            store,
            handlers: HandlerRegistry::with_defaults(),
            hooks,
            retry: RetryPolicy::default(),
            compensation_policy: CompensationFailurePolicy::default(),
        }
    }

    pub fn from_config(
        store: Arc<S>,
        hooks: Arc<dyn MutationHooks>,
        config: &ReplicationConfig,
    ) -> Self {
        Self::new(store, hooks)
            .with_retry_policy(config.retry_policy())
            .with_compensation_policy(config.compensation_policy)
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_compensation_policy(mut self, policy: CompensationFailurePolicy) -> Self {
        self.compensation_policy = policy;
        self
    }

    pub fn hooks(&self) -> &Arc<dyn MutationHooks> {
        &self.hooks
    }

    pub async fn create(&self, data_type: DataType, payload: Value) -> Result<MutationOutcome> {
        self.execute(MutationRequest::create(data_type, payload)).await
    }

    pub async fn update(
        &self,
        data_type: DataType,
        id: &str,
        payload: Value,
    ) -> Result<MutationOutcome> {
        self.execute(MutationRequest::update(data_type, id, payload)).await
    }

    pub async fn delete(&self, data_type: DataType, id: &str) -> Result<MutationOutcome> {
        self.execute(MutationRequest::delete(data_type, id)).await
    }

    pub fn get_resource(&self, data_type: DataType, id: &str) -> Result<Option<Resource>> {
        self.store.get_resource(data_type, id)
    }

    pub fn list_resources(&self, data_type: DataType) -> Result<Vec<Resource>> {
        self.store.list_resources(data_type)
    }

    /// Runs one mutation through both phases.
    ///
    /// On remote failure the local change is compensated and the remote error
    /// is returned as `RemoteApplyFailed`.
    pub async fn execute(&self, request: MutationRequest) -> Result<MutationOutcome> {
        let handler = self.handlers.get(request.data_type).ok_or_else(|| {
            Error::validation(format!("no handler registered for {}", request.data_type))
        })?;
        let operation = request.operation();
        let label = format!("{} {}", operation, request.data_type);
        debug!("[Mutation] {} {}", label, MutationPhase::PendingLocal);

        let commit = self
            .retry
            .run(&label, || self.run_local(handler.clone(), request.clone()))
            .await?;
        debug!(
            "[Mutation] {} {} {} in {}",
            label,
            commit.applied.resource_id,
            MutationPhase::LocalCommitted,
            commit.transaction_id
        );

        match self.hooks.remote(&commit.applied).await {
            Ok(()) => {
                debug!(
                    "[Mutation] {} {} {}",
                    label,
                    commit.applied.resource_id,
                    MutationPhase::RemoteOk
                );
                Ok(MutationOutcome {
                    data_type: commit.applied.data_type,
                    operation,
                    resource_id: commit.applied.resource_id,
                    resource: commit.applied.resource,
                    task_id: commit.task_id,
                    transaction_id: commit.transaction_id,
                    phase: MutationPhase::RemoteOk,
                })
            }
            Err(err) => Err(self.compensate(commit, err).await),
        }
    }

    async fn run_local(
        &self,
        handler: Arc<dyn ResourceHandler>,
        request: MutationRequest,
    ) -> Result<LocalCommit> {
        let hooks = self.hooks.clone();
        self.store
            .transaction(move |tx| {
                if tx.replication_state()?.readonly {
                    return Err(ReplicationError::ReadOnly.into());
                }
                let (applied, compensation) = apply_local(tx, handler.as_ref(), request)?;
                let task_id = hooks.local(tx, &applied)?;
                Ok(LocalCommit {
                    applied,
                    compensation,
                    task_id,
                    transaction_id: tx.transaction_id().to_string(),
                })
            })
            .await
    }

    async fn compensate(&self, commit: LocalCommit, remote_err: Error) -> Error {
        let applied = &commit.applied;
        warn!(
            "[Mutation] {} {}/{} {}: {}",
            applied.operation,
            applied.data_type,
            applied.resource_id,
            MutationPhase::RemoteFailed,
            remote_err
        );
        let mut failure = into_remote_apply_failed(applied, remote_err);

        debug!(
            "[Mutation] {} {}/{} {}",
            commit.compensation.operation(),
            applied.data_type,
            applied.resource_id,
            MutationPhase::Compensating
        );
        let label = format!("compensate {}", applied.data_type);
        let result = self
            .retry
            .run(&label, || {
                self.run_compensation(commit.compensation.clone(), applied.correlation_id.clone())
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    "[Mutation] {} {}/{} {}",
                    applied.operation,
                    applied.data_type,
                    applied.resource_id,
                    MutationPhase::Compensated
                );
            }
            Err(comp_err) => {
                let message = comp_err.to_string();
                error!(
                    "[Mutation] {} {}/{}: {}",
                    applied.operation,
                    applied.data_type,
                    applied.resource_id,
                    ReplicationError::CompensationFailed(message.clone())
                );
                if self.compensation_policy == CompensationFailurePolicy::Attach {
                    if let ReplicationError::RemoteApplyFailed {
                        compensation_error, ..
                    } = &mut failure
                    {
                        *compensation_error = Some(message);
                    }
                }
            }
        }
        failure.into()
    }

    async fn run_compensation(
        &self,
        compensation: Compensation,
        correlation_id: Option<String>,
    ) -> Result<()> {
        let hooks = self.hooks.clone();
        self.store
            .transaction(move |tx| {
                let applied = apply_compensation(tx, compensation, correlation_id)?;
                hooks.local(tx, &applied)?;
                Ok(())
            })
            .await
    }
}

/// Dispatches the request to its handler and captures the inverse.
fn apply_local(
    tx: &mut dyn StoreTx,
    handler: &dyn ResourceHandler,
    request: MutationRequest,
) -> Result<(AppliedMutation, Compensation)> {
    let data_type = request.data_type;
    let operation = request.operation();
    let (resource_id, resource, compensation) = match request.target {
        MutationTarget::Create { payload } => {
            let resource = handler.create(tx, payload)?;
            let compensation = Compensation::Delete {
                data_type,
                resource_id: resource.id.clone(),
            };
            (resource.id.clone(), Some(resource), compensation)
        }
        MutationTarget::Update { id, payload } => {
            let existing = load_existing(tx, data_type, &id)?;
            let resource = handler.update(tx, &existing, payload)?;
            let compensation = Compensation::Restore {
                data_type,
                resource_id: id.clone(),
                data: existing.data,
            };
            (id, Some(resource), compensation)
        }
        MutationTarget::Delete { id } => {
            let existing = load_existing(tx, data_type, &id)?;
            handler.delete(tx, &existing)?;
            let compensation = Compensation::Reinsert {
                data_type,
                resource_id: id.clone(),
                data: existing.data,
            };
            (id, None, compensation)
        }
    };
    Ok((
        AppliedMutation {
            data_type,
            operation,
            resource_id,
            resource,
            correlation_id: request.correlation_id,
        },
        compensation,
    ))
}

fn load_existing(tx: &mut dyn StoreTx, data_type: DataType, id: &str) -> Result<Resource> {
    tx.load_resource(data_type, id)?
        .ok_or_else(|| Error::not_found(format!("{data_type} {id}")))
}

/// Executes a compensation descriptor. The readonly gate is not consulted.
fn apply_compensation(
    tx: &mut dyn StoreTx,
    compensation: Compensation,
    correlation_id: Option<String>,
) -> Result<AppliedMutation> {
    let operation = compensation.operation();
    let (data_type, resource_id, resource) = match compensation {
        Compensation::Delete {
            data_type,
            resource_id,
        } => {
            if !tx.delete_resource(data_type, &resource_id)? {
                warn!(
                    "[Mutation] Compensating delete found no {}/{}",
                    data_type, resource_id
                );
            }
            (data_type, resource_id, None)
        }
        Compensation::Restore {
            data_type,
            resource_id,
            data,
        } => {
            let resource = tx.replace_resource(data_type, &resource_id, &data)?;
            (data_type, resource_id, Some(resource))
        }
        Compensation::Reinsert {
            data_type,
            resource_id,
            data,
        } => {
            let resource = tx.insert_resource(data_type, &resource_id, &data)?;
            (data_type, resource_id, Some(resource))
        }
    };
    Ok(AppliedMutation {
        data_type,
        operation,
        resource_id,
        resource,
        correlation_id,
    })
}

/// Normalizes a remote hook error. Hooks that already produce
/// `RemoteApplyFailed` keep their message.
fn into_remote_apply_failed(applied: &AppliedMutation, err: Error) -> ReplicationError {
    match err {
        Error::Replication(failure @ ReplicationError::RemoteApplyFailed { .. }) => failure,
        other => ReplicationError::RemoteApplyFailed {
            data_type: applied.data_type,
            resource_id: applied.resource_id.clone(),
            operation: applied.operation,
            message: other.to_string(),
            compensation_error: None,
        },
    }
}

/// Error a remote hook returns when the backend rejects `applied`.
pub fn remote_apply_failed(applied: &AppliedMutation, message: impl Into<String>) -> Error {
    ReplicationError::RemoteApplyFailed {
        data_type: applied.data_type,
        resource_id: applied.resource_id.clone(),
        operation: applied.operation,
        message: message.into(),
        compensation_error: None,
    }
    .into()
}
