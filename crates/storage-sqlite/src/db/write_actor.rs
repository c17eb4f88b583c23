//! Single writer thread. Every mutation is funnelled through one connection so
//! SQLite never sees concurrent writers.

use diesel::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use bankfeed_core::Result;

use super::DbPool;
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Cloneable handle to the writer thread.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    /// Run `job` on the writer connection and wait for its result.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: Job = Box::new(move |conn| {
            // The caller may have gone away; nothing to report then.
            let _ = reply_tx.send(job(conn));
        });
        self.tx.send(boxed).map_err(|_| StorageError::WriterClosed)?;
        reply_rx.await.map_err(|_| StorageError::WriterClosed)?
    }
}

/// Start the writer thread on a dedicated pool connection.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let spawned = std::thread::Builder::new()
        .name("sqlite-writer".to_string())
        .spawn(move || {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    error!("[Storage] Writer could not acquire a connection: {}", err);
                    return;
                }
            };
            debug!("[Storage] Writer started");
            while let Some(job) = rx.blocking_recv() {
                job(&mut *conn);
            }
            debug!("[Storage] Writer stopped");
        });
    if let Err(err) = spawned {
        error!("[Storage] Failed to start writer thread: {}", err);
    }
    WriteHandle { tx }
}
