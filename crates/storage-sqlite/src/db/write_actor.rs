//! Single-writer actor. Every write job runs on one dedicated thread inside an
//! IMMEDIATE transaction, so writers never interleave.

use diesel::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use netplane_core::errors::{DatabaseError, Error, Result};

use super::{DbConnection, DbPool};
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    /// Runs `job` in its own IMMEDIATE transaction on the writer connection.
    /// An `Err` from the job rolls the transaction back.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply, response) = oneshot::channel::<Result<T>>();
        let wrapped: Job = Box::new(move |conn| {
            let result = conn
                .immediate_transaction::<T, StorageError, _>(|tx| {
                    job(tx).map_err(StorageError::from)
                })
                .map_err(Error::from);
            // The caller may have gone away; nothing to report to.
            let _ = reply.send(result);
        });

        self.sender.send(wrapped).map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "Writer actor is not running".to_string(),
            ))
        })?;
        response.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "Writer actor dropped the job".to_string(),
            ))
        })?
    }
}

/// Starts the writer thread. It owns one pooled connection and lives until
/// every `WriteHandle` is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
    let spawned = std::thread::Builder::new()
        .name("netplane-writer".to_string())
        .spawn(move || {
            let mut conn: Option<DbConnection> = None;
            while let Some(job) = receiver.blocking_recv() {
                if conn.is_none() {
                    match pool.get() {
                        Ok(acquired) => conn = Some(acquired),
                        Err(err) => {
                            // Dropping the job closes its reply channel.
                            error!("[Writer] Could not acquire a connection: {}", err);
                            continue;
                        }
                    }
                }
                if let Some(conn) = conn.as_mut() {
                    job(conn);
                }
            }
            debug!("[Writer] All handles dropped, stopping");
        });
    if let Err(err) = spawned {
        error!("[Writer] Could not start writer thread: {}", err);
    }
    WriteHandle { sender }
}
