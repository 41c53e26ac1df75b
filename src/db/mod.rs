use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod helpers;
mod migrations;
mod repositories;

use migrations::run_migrations;

/// Namespace holding `revenue` and `cognitive_load`.
pub const METRICS_NAMESPACE: &str = "metrics";
/// Namespace holding app -> last shame timestamp.
pub const SHAME_NAMESPACE: &str = "shame";
/// Namespace holding the active focus session, if any.
pub const FOCUS_NAMESPACE: &str = "focus";

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// Durable key-value store on SQLite. All access is serialized through one
/// worker thread that owns the connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("bray-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    pub async fn get(&self, namespace: &'static str, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .with_context(|| format!("failed to read {namespace}/{key}"))?;
            Ok(value)
        })
        .await
    }

    pub async fn put(&self, namespace: &'static str, key: &str, value: &str) -> Result<()> {
        self.put_many(namespace, vec![(key.to_string(), value.to_string())])
            .await
    }

    /// Writes every pair in one transaction: either all land or none do.
    pub async fn put_many(
        &self,
        namespace: &'static str,
        entries: Vec<(String, String)>,
    ) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open write transaction")?;
            let now = Utc::now().to_rfc3339();
            for (key, value) in &entries {
                tx.execute(
                    "INSERT INTO kv_entries (namespace, key, value, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(namespace, key) DO UPDATE SET
                         value = excluded.value,
                         updated_at = excluded.updated_at",
                    params![namespace, key, value, now],
                )
                .with_context(|| format!("failed to write {namespace}/{key}"))?;
            }
            tx.commit().context("failed to commit write transaction")?;
            Ok(())
        })
        .await
    }

    pub async fn entries(&self, namespace: &'static str) -> Result<Vec<(String, String)>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv_entries WHERE namespace = ?1 ORDER BY key",
            )?;
            let rows = stmt
                .query_map(params![namespace], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("failed to list {namespace}"))?;
            Ok(rows)
        })
        .await
    }

    pub async fn clear_namespace(&self, namespace: &'static str) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM kv_entries WHERE namespace = ?1",
                params![namespace],
            )
            .with_context(|| format!("failed to clear {namespace}"))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Makes every later read and write fail, standing in for a broken disk.
    pub async fn break_storage(db: &Database) {
        db.execute(|conn| {
            conn.execute_batch("DROP TABLE kv_entries")?;
            Ok(())
        })
        .await
        .unwrap();
    }

    /// Reads keep working; every insert or update is rejected.
    pub async fn block_writes(db: &Database) {
        db.execute(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_inserts BEFORE INSERT ON kv_entries
                     BEGIN SELECT RAISE(ABORT, 'writes blocked'); END;
                 CREATE TRIGGER block_updates BEFORE UPDATE ON kv_entries
                     BEGIN SELECT RAISE(ABORT, 'writes blocked'); END;",
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }
}
