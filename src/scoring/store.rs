use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::{AppIdentity, ScoreState, ShameEvent};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Durable scores plus the in-memory shame log for this run.
///
/// Everyone may read; only the score updater writes scores, through
/// [`ScoreStore::read_modify_write`].
#[derive(Clone)]
pub struct ScoreStore {
    db: Database,
    defaults: ScoreState,
    shame_log: Arc<Mutex<HashMap<AppIdentity, DateTime<Utc>>>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ScoreStore {
    pub fn new(db: Database, defaults: ScoreState) -> Self {
        Self {
            db,
            defaults,
            shame_log: Arc::new(Mutex::new(HashMap::new())),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub async fn scores(&self) -> Result<ScoreState> {
        self.db.load_scores(self.defaults).await
    }

    /// Current scores, or the defaults when storage cannot be read.
    pub async fn scores_or_default(&self) -> ScoreState {
        match self.scores().await {
            Ok(scores) => scores,
            Err(err) => {
                log_warn!("score store unreadable, showing defaults: {err:#}");
                self.defaults
            }
        }
    }

    /// Records that the user waved off an intervention for `app`. The
    /// in-memory entry is kept even if the durable copy cannot be written.
    pub async fn record_shame(&self, app: &AppIdentity, at: DateTime<Utc>) -> ShameEvent {
        self.lock_shame().insert(app.clone(), at);
        let event = ShameEvent {
            app: app.clone(),
            recorded_at: at,
        };

        match self.db.record_shame(&event).await {
            Ok(()) => log_debug!("shame recorded for {app}"),
            Err(err) => log_warn!("shame for {app} kept in memory only: {err:#}"),
        }
        event
    }

    /// Number of distinct apps with an outstanding shame entry.
    pub fn shame_log_size(&self) -> usize {
        self.lock_shame().len()
    }

    /// The shame log, ordered by app.
    pub fn shame_events(&self) -> Vec<ShameEvent> {
        let mut events: Vec<ShameEvent> = self
            .lock_shame()
            .iter()
            .map(|(app, at)| ShameEvent {
                app: app.clone(),
                recorded_at: *at,
            })
            .collect();
        events.sort_by(|a, b| a.app.cmp(&b.app));
        events
    }

    /// Serialized read-modify-write of the score pair. Nothing is written if
    /// the read fails; the stored value stays as it was if the write fails.
    pub(super) async fn read_modify_write<F>(&self, apply: F) -> Result<(ScoreState, ScoreState)>
    where
        F: FnOnce(ScoreState) -> ScoreState,
    {
        let _guard = self.write_lock.lock().await;
        let before = self.scores().await?;
        let after = apply(before);
        self.db.save_scores(after).await?;
        Ok((before, after))
    }

    fn lock_shame(&self) -> MutexGuard<'_, HashMap<AppIdentity, DateTime<Utc>>> {
        self.shame_log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
