//! Single-threaded home for every platform call.
//!
//! The platform handle lives on one dedicated thread; callers hand it boxed
//! closures over a channel and await the answer on a oneshot. This keeps all
//! OS-facing calls on the same execution context no matter which task asks.

use std::{
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use tokio::sync::oneshot;

use crate::error::{EffectError, EffectResult};
use crate::models::{AppIdentity, UsageRecord};
use crate::platform::{NotificationFilter, Platform};

type EffectTask = Box<dyn FnOnce(&mut dyn Platform) + Send + 'static>;

enum EffectCommand {
    Execute(EffectTask),
    Shutdown,
}

struct DispatcherInner {
    sender: mpsc::Sender<EffectCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(EffectCommand::Shutdown) {
                error!("Failed to send shutdown to effect thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join effect thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct EffectDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EffectDispatcher {
    pub fn spawn<P>(platform: P) -> Result<Self>
    where
        P: Platform + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<EffectCommand>();

        let worker = thread::Builder::new()
            .name("bray-effects".into())
            .spawn(move || {
                let mut platform = platform;
                while let Ok(command) = command_rx.recv() {
                    match command {
                        EffectCommand::Execute(task) => task(&mut platform),
                        EffectCommand::Shutdown => break,
                    }
                }
                info!("Effect thread shutting down");
            })
            .context("failed to spawn effect thread")?;

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, effect: &'static str, task: F) -> EffectResult<T>
    where
        F: FnOnce(&mut dyn Platform) -> EffectResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = EffectCommand::Execute(Box::new(move |platform| {
            let result = task(platform);
            if reply_tx.send(result).is_err() {
                error!("effect caller dropped before receiving {effect} result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| EffectError::failed(effect, format!("effect thread unavailable: {err}")))?;

        reply_rx
            .await
            .map_err(|_| EffectError::failed(effect, "effect thread terminated unexpectedly"))?
    }

    pub async fn query_foreground_usage(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EffectResult<Vec<UsageRecord>> {
        self.execute("foreground query", move |platform| {
            platform.query_foreground_usage(window_start, window_end)
        })
        .await
    }

    pub async fn notification_filter(&self) -> EffectResult<NotificationFilter> {
        self.execute("read notification filter", |platform| {
            Ok(platform.notification_filter())
        })
        .await
    }

    pub async fn set_notification_filter(&self, mode: NotificationFilter) -> EffectResult<()> {
        self.execute("notification filter", move |platform| {
            platform.set_notification_filter(mode)
        })
        .await
    }

    pub async fn ringer_silent(&self) -> EffectResult<bool> {
        self.execute("read ringer", |platform| Ok(platform.ringer_silent()))
            .await
    }

    pub async fn set_ringer_silent(&self, silent: bool) -> EffectResult<()> {
        self.execute("ringer", move |platform| platform.set_ringer_silent(silent))
            .await
    }

    pub async fn terminate(&self, app: &AppIdentity) -> EffectResult<()> {
        let app = app.clone();
        self.execute("terminate", move |platform| {
            platform.terminate_background_processes(&app)
        })
        .await
    }

    pub async fn set_suspended(&self, app: &AppIdentity, suspended: bool) -> EffectResult<()> {
        let app = app.clone();
        self.execute("suspend", move |platform| {
            platform.set_app_suspended(&app, suspended)
        })
        .await
    }

    pub async fn has_elevated_authority(&self) -> bool {
        self.execute("authority check", |platform| {
            Ok(platform.has_elevated_authority())
        })
        .await
        .unwrap_or(false)
    }
}
