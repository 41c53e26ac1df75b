use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::effects::EffectDispatcher;
use crate::models::{AppIdentity, FocusRecord};
use crate::platform::NotificationFilter;
use crate::policy::PolicyHandle;

use super::{FocusState, PriorState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Upper bound for one session; longer requests are clamped.
pub const MAX_FOCUS_MINUTES: u64 = 24 * 60;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    pub state: FocusState,
    pub remaining_ms: i64,
}

struct ExpiryTimer {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single focus session. Every transition runs under the state lock,
/// so an enable, a disable and a firing timer never interleave.
#[derive(Clone)]
pub struct FocusModeController {
    state: Arc<Mutex<FocusState>>,
    effects: EffectDispatcher,
    policy: PolicyHandle,
    db: Database,
    timer: Arc<std::sync::Mutex<Option<ExpiryTimer>>>,
}

impl FocusModeController {
    pub fn new(effects: EffectDispatcher, policy: PolicyHandle, db: Database) -> Self {
        Self {
            state: Arc::new(Mutex::new(FocusState::new())),
            effects,
            policy,
            db,
            timer: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    pub async fn get_snapshot(&self) -> FocusSnapshot {
        snapshot_of(&*self.state.lock().await)
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active()
    }

    pub async fn expires_at(&self) -> Option<chrono::DateTime<Utc>> {
        let guard = self.state.lock().await;
        if guard.is_active() {
            guard.expires_at
        } else {
            None
        }
    }

    pub async fn enable_focus(&self, minutes: u64) -> FocusSnapshot {
        self.enable_focus_for(focus_duration(minutes)).await
    }

    pub async fn enable_focus_for(&self, duration: Duration) -> FocusSnapshot {
        let mut state = self.state.lock().await;
        self.enable_locked(&mut state, duration).await;
        snapshot_of(&state)
    }

    /// Returns false when no session was active.
    pub async fn disable_focus(&self) -> bool {
        let mut state = self.state.lock().await;
        self.disable_locked(&mut state).await
    }

    pub async fn toggle_focus(&self, default_minutes: u64) -> FocusSnapshot {
        let mut state = self.state.lock().await;
        if state.is_active() {
            self.disable_locked(&mut state).await;
        } else {
            self.enable_locked(&mut state, focus_duration(default_minutes)).await;
        }
        snapshot_of(&state)
    }

    /// Boot hook. Finishes a session left behind by a previous run: reverts it
    /// when already over (or about to be), otherwise re-arms the timer.
    pub async fn resume(&self, grace: Duration) -> FocusSnapshot {
        let record = match self.db.load_focus_session().await {
            Ok(Some(record)) => record,
            Ok(None) => return self.get_snapshot().await,
            Err(err) => {
                log_warn!("stored focus session unreadable, leaving it: {err:#}");
                return self.get_snapshot().await;
            }
        };

        let mut state = self.state.lock().await;
        let generation = state.restore(&record);
        let remaining = (record.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        if remaining <= grace {
            log_info!("focus session from a previous run has ended; restoring device state");
            self.revert(&mut state).await;
        } else {
            log_info!("resuming focus session until {}", record.expires_at);
            self.arm_timer(generation, remaining);
        }

        snapshot_of(&state)
    }

    async fn enable_locked(&self, state: &mut FocusState, duration: Duration) {
        let was_active = state.is_active();
        let (prior, already_suspended) = if was_active {
            (state.prior.clone(), state.suspended.clone())
        } else {
            (self.observe_prior_state().await, Vec::new())
        };
        let expires_at = Utc::now()
            + TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::minutes(MAX_FOCUS_MINUTES as i64));

        // Recorded before the device is touched, so a crash part way through
        // still leaves `resume` something to revert.
        self.persist(&FocusRecord {
            expires_at,
            prior_filter: prior.filter,
            prior_silent: prior.silent,
            suspended: already_suspended,
        })
        .await;

        self.apply_effect("notification filter", self.effects.set_notification_filter(NotificationFilter::None).await);
        self.apply_effect("ringer", self.effects.set_ringer_silent(true).await);

        let targets = self.policy.current().focus_targets();
        for app in &targets {
            self.apply_effect("terminate", self.effects.terminate(app).await);
        }
        let suspended = self.suspend_all(&targets).await;

        let generation = state.activate(expires_at, prior, suspended);
        if let Some(record) = state.record() {
            self.persist(&record).await;
        }

        self.arm_timer(generation, duration);

        if was_active {
            log_info!("focus extended until {expires_at}");
        } else {
            log_info!("focus enabled until {expires_at}");
        }
    }

    async fn disable_locked(&self, state: &mut FocusState) -> bool {
        if !state.is_active() {
            log_debug!("disable requested while focus inactive");
            return false;
        }
        self.cancel_timer();
        self.revert(state).await;
        log_info!("focus disabled");
        true
    }

    async fn persist(&self, record: &FocusRecord) {
        if let Err(err) = self.db.save_focus_session(record).await {
            log_warn!("failed to persist focus session: {err:#}");
        }
    }

    async fn expire(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.is_active() || state.generation != generation {
            log_debug!("stale focus timer (generation {generation}) ignored");
            return;
        }
        {
            let mut timer = self.lock_timer();
            if timer.as_ref().is_some_and(|t| t.generation == generation) {
                timer.take();
            }
        }
        self.revert(&mut state).await;
        log_info!("focus session expired");
    }

    async fn revert(&self, state: &mut FocusState) {
        let Some((prior, suspended)) = state.deactivate() else {
            return;
        };

        self.apply_effect("notification filter", self.effects.set_notification_filter(prior.filter).await);
        self.apply_effect("ringer", self.effects.set_ringer_silent(prior.silent).await);

        if !suspended.is_empty() {
            if self.effects.has_elevated_authority().await {
                for app in &suspended {
                    self.apply_effect("unsuspend", self.effects.set_suspended(app, false).await);
                }
            } else {
                log_info!("elevated authority missing; {} apps left suspended", suspended.len());
            }
        }

        if let Err(err) = self.db.clear_focus_session().await {
            log_warn!("failed to clear stored focus session: {err:#}");
        }
    }

    async fn observe_prior_state(&self) -> PriorState {
        let defaults = PriorState::default();
        let filter = match self.effects.notification_filter().await {
            Ok(filter) => filter,
            Err(err) => {
                log_warn!("could not read notification filter, assuming all: {err}");
                defaults.filter
            }
        };
        let silent = match self.effects.ringer_silent().await {
            Ok(silent) => silent,
            Err(err) => {
                log_warn!("could not read ringer state, assuming audible: {err}");
                defaults.silent
            }
        };
        PriorState { filter, silent }
    }

    async fn suspend_all(&self, targets: &[AppIdentity]) -> Vec<AppIdentity> {
        if !self.effects.has_elevated_authority().await {
            log_info!("elevated authority missing; skipping suspension");
            return Vec::new();
        }
        let mut suspended = Vec::new();
        for app in targets {
            match self.effects.set_suspended(app, true).await {
                Ok(()) => suspended.push(app.clone()),
                Err(err) => self.apply_effect::<()>("suspend", Err(err)),
            }
        }
        suspended
    }

    fn apply_effect<T>(&self, effect: &str, result: crate::error::EffectResult<T>) {
        match result {
            Ok(_) => {}
            Err(err) if err.is_expected() => log_debug!("{effect}: {err}"),
            Err(err) => log_warn!("{effect} failed: {err}"),
        }
    }

    fn arm_timer(&self, generation: u64, duration: Duration) {
        self.cancel_timer();

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(duration) => controller.expire(generation).await,
                _ = child.cancelled() => {}
            }
        });

        *self.lock_timer() = Some(ExpiryTimer {
            generation,
            cancel,
            handle,
        });
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.cancel.cancel();
            if timer.handle.is_finished() {
                log_debug!("focus timer for generation {} already finished", timer.generation);
            }
        }
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<ExpiryTimer>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn focus_duration(minutes: u64) -> Duration {
    let minutes = if minutes > MAX_FOCUS_MINUTES {
        log_warn!("focus of {minutes} minutes clamped to {MAX_FOCUS_MINUTES}");
        MAX_FOCUS_MINUTES
    } else {
        minutes
    };
    Duration::from_secs(minutes * 60)
}

fn snapshot_of(state: &FocusState) -> FocusSnapshot {
    FocusSnapshot {
        remaining_ms: state.remaining_ms(Utc::now()),
        state: state.clone(),
    }
}
