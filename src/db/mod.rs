use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod migrations;
mod models;
mod snapshots;

pub use models::{DamLevelSnapshot, TurbiditySnapshot};

use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Run(DbTask),
    Shutdown,
}

struct DatabaseWorker {
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseWorker {
    fn drop(&mut self) {
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if self.sender.send(DbCommand::Shutdown).is_err() {
                error!("snapshot store thread already gone at shutdown");
            }
            if let Err(err) = handle.join() {
                error!("failed to join snapshot store thread: {err:?}");
            }
        }
    }
}

/// Async façade over a single SQLite connection owned by a dedicated thread.
///
/// All access funnels through [`Database::execute`]; callers never touch the
/// connection directly, so concurrent writers serialize on the command
/// channel and upserts converge on the slot's unique key.
#[derive(Clone)]
pub struct Database {
    worker: Arc<DatabaseWorker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let handle = thread::Builder::new()
            .name("damwatch-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite database")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }

                let init = run_migrations(&mut conn).context("failed to run migrations");
                if ready_tx.send(init).is_err() {
                    error!("snapshot store initialization receiver dropped");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Run(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }
            })
            .context("failed to spawn snapshot store thread")?;

        ready_rx
            .recv()
            .context("snapshot store thread exited before signaling readiness")??;

        info!("snapshot store ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(DatabaseWorker {
                sender: command_tx,
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub(crate) async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Run(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("snapshot store caller dropped before receiving result");
            }
        }));

        self.worker
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to reach snapshot store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("snapshot store thread terminated unexpectedly"))?
    }
}
