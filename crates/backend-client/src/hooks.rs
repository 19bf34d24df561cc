//! Mutation hooks for the `direct_rest` client and the startup selection
//! between task-log and direct hooks.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use netplane_core::errors::{Error, Result};
use netplane_core::mutation::{
    remote_apply_failed, AppliedMutation, MutationHooks, Operation, StoreTx, TaskLogHooks,
};
use netplane_core::{ClientKind, ReplicationConfig};

use crate::client::BackendClient;

/// Calls the backend synchronously after the local commit. Nothing is
/// appended to the task log.
#[derive(Debug, Clone)]
pub struct DirectBackendHooks {
    client: BackendClient,
}

impl DirectBackendHooks {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MutationHooks for DirectBackendHooks {
    fn kind(&self) -> ClientKind {
        ClientKind::DirectRest
    }

    fn local(&self, _tx: &mut dyn StoreTx, _applied: &AppliedMutation) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn remote(&self, applied: &AppliedMutation) -> Result<()> {
        let data_type = applied.data_type;
        let id = applied.resource_id.as_str();
        let result = match (applied.operation, &applied.resource) {
            (Operation::Create, Some(resource)) => self
                .client
                .create_resource(data_type, &resource.data)
                .await
                .map(|_| ()),
            (Operation::Update, Some(resource)) => self
                .client
                .update_resource(data_type, id, &resource.data)
                .await
                .map(|_| ()),
            (Operation::Delete, _) => self.client.delete_resource(data_type, id).await,
            (operation, None) => {
                return Err(remote_apply_failed(
                    applied,
                    format!("{operation} {data_type}/{id} carries no resource body"),
                ))
            }
        };

        match result {
            Ok(()) => {
                debug!("[Backend] Applied {} {}/{}", applied.operation, data_type, id);
                Ok(())
            }
            Err(err) => {
                let retry_class = err.retry_class();
                warn!(
                    "[Backend] {} {}/{} rejected ({}): {}",
                    applied.operation, data_type, id, retry_class, err
                );
                Err(remote_apply_failed(applied, format!("{err} [{retry_class}]")))
            }
        }
    }
}

/// Hooks for the configured client kind.
pub fn build_hooks(config: &ReplicationConfig) -> Result<Arc<dyn MutationHooks>> {
    config.validate()?;
    match config.client {
        ClientKind::TaskLog => {
            info!("[Backend] Using task-log client");
            Ok(Arc::new(TaskLogHooks))
        }
        ClientKind::DirectRest => {
            let base_url = config.backend_url.as_deref().ok_or_else(|| {
                Error::Config("a backend URL is required for the direct_rest client".to_string())
            })?;
            let client = BackendClient::new(base_url, config.backend_token.clone())
                .map_err(|e| Error::Config(format!("Failed to build backend client: {e}")))?;
            info!("[Backend] Using direct REST client against {}", client.base_url());
            Ok(Arc::new(DirectBackendHooks::new(client)))
        }
    }
}
