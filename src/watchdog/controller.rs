use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::effects::EffectDispatcher;
use crate::focus::FocusModeController;
use crate::intervention::InterventionController;
use crate::presentation::Presenter;
use crate::scoring::{ScoreStore, ScoreUpdater};
use crate::settings::WatchdogSettings;

use super::loop_worker::{watchdog_loop, TickContext};
use super::sampler::ForegroundSampler;

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Collaborators the loop is built from on every start.
#[derive(Clone)]
pub struct WatchdogDeps {
    pub effects: EffectDispatcher,
    pub intervention: InterventionController,
    pub scores: ScoreStore,
    /// Outlives any one loop so a restart keeps the score rate window.
    pub updater: ScoreUpdater,
    pub focus: FocusModeController,
    pub presenter: Arc<dyn Presenter>,
}

/// Starts and stops the supervised loop task. Stopping leaves focus mode
/// alone: its timer belongs to the focus controller.
pub struct WatchdogController {
    deps: WatchdogDeps,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl WatchdogController {
    pub fn new(deps: WatchdogDeps) -> Self {
        Self {
            deps,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn start(&mut self, settings: &WatchdogSettings) -> Result<()> {
        if self.handle.is_some() {
            bail!("watchdog already running");
        }

        let ctx = TickContext {
            sampler: ForegroundSampler::new(self.deps.effects.clone(), settings.sample_window()),
            intervention: self.deps.intervention.clone(),
            updater: self.deps.updater.with_min_interval(settings.score_update_interval()),
            scores: self.deps.scores.clone(),
            focus: self.deps.focus.clone(),
            presenter: self.deps.presenter.clone(),
            sample_timeout: settings.sample_timeout(),
        };

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(watchdog_loop(
            ctx,
            settings.tick_interval(),
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("watchdog loop task failed to join")?;
            log_info!("watchdog stopped");
        }
        Ok(())
    }

    /// Stop, then start again with fresh settings.
    pub async fn restart(&mut self, settings: &WatchdogSettings) -> Result<()> {
        self.stop().await?;
        self.start(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::Database;
    use crate::intervention::test_support::ScriptedPresenter;
    use crate::models::ScoreState;
    use crate::platform::{MemoryPlatform, NotificationFilter};
    use crate::policy::{PolicyHandle, PolicySet};
    use crate::presentation::InterventionChoice;
    use crate::scoring::UpdateOutcome;
    use crate::watchdog::run_tick;

    struct Harness {
        _dir: tempfile::TempDir,
        platform: MemoryPlatform,
        presenter: Arc<ScriptedPresenter>,
        db: Database,
        deps: WatchdogDeps,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bray.sqlite3")).unwrap();
        let platform = MemoryPlatform::new();
        let effects = EffectDispatcher::spawn(platform.clone()).unwrap();
        let policy = PolicyHandle::new(PolicySet::canonical());
        let scores = ScoreStore::new(db.clone(), ScoreState::clamped(0, 45));
        let presenter = Arc::new(ScriptedPresenter::default());
        let intervention = InterventionController::new(
            policy.clone(),
            presenter.clone(),
            effects.clone(),
            scores.clone(),
        );
        let focus = FocusModeController::new(effects.clone(), policy, db.clone());
        let updater = ScoreUpdater::new(scores.clone(), Duration::from_secs(300));
        Harness {
            _dir: dir,
            platform,
            presenter: presenter.clone(),
            db,
            deps: WatchdogDeps {
                effects,
                intervention,
                scores,
                updater,
                focus,
                presenter,
            },
        }
    }

    fn fast_settings() -> WatchdogSettings {
        WatchdogSettings {
            tick_interval_secs: 1,
            ..WatchdogSettings::default()
        }
    }

    fn context(h: &Harness) -> TickContext {
        TickContext {
            sampler: ForegroundSampler::new(h.deps.effects.clone(), Duration::from_secs(5)),
            intervention: h.deps.intervention.clone(),
            updater: h.deps.updater.clone(),
            scores: h.deps.scores.clone(),
            focus: h.deps.focus.clone(),
            presenter: h.deps.presenter.clone(),
            sample_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn tick_on_an_innocent_app_only_repaints() {
        let h = harness();
        h.platform.bring_to_front("com.android.settings");
        let mut ctx = context(&h);

        let report = run_tick(&mut ctx).await;

        assert_eq!(report.foreground, Some("com.android.settings".into()));
        assert!(!report.intervention_requested);
        assert_eq!(h.presenter.request_count(), 0);
        assert_eq!(h.presenter.statuses.lock().unwrap().len(), 1);
        assert_eq!(report.status.to_string(), "Revenue: €0 | Load: 45%");
    }

    #[tokio::test]
    async fn deferred_app_costs_revenue_on_the_next_update() {
        let h = harness();
        h.db.save_scores(ScoreState::clamped(20, 45)).await.unwrap();
        h.platform.bring_to_front("com.instagram.android");
        let mut ctx = context(&h);

        let first = run_tick(&mut ctx).await;
        assert!(first.intervention_requested);
        assert_eq!(h.presenter.requests.lock().unwrap()[0].1, 20);
        h.presenter.answer_next(InterventionChoice::Defer);
        while h.deps.intervention.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // A separate updater has its own rate window.
        ctx.updater = ScoreUpdater::new(h.deps.scores.clone(), Duration::from_secs(300));
        let second = run_tick(&mut ctx).await;

        assert!(matches!(second.update, UpdateOutcome::Applied { shame_count: 1, .. }));
        assert_eq!(second.status.revenue, 15);
        assert_eq!(second.status.cognitive_load, 48);
    }

    #[tokio::test]
    async fn status_shows_focus_deadline() {
        let h = harness();
        h.deps.focus.enable_focus(90).await;
        let mut ctx = context(&h);

        let report = run_tick(&mut ctx).await;

        assert!(report.status.focus_expires_at.is_some());
        assert!(report.status.to_string().contains("Focus until"));
    }

    #[tokio::test]
    async fn loop_ticks_immediately_and_stops_promptly() {
        let h = harness();
        h.platform.bring_to_front("com.reddit.frontpage");
        let mut watchdog = WatchdogController::new(h.deps.clone());

        watchdog.start(&fast_settings()).unwrap();
        assert!(watchdog.start(&fast_settings()).is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(watchdog.is_running());

        tokio::time::timeout(Duration::from_millis(500), watchdog.stop())
            .await
            .expect("stop should not wait for the next tick")
            .unwrap();

        assert!(!watchdog.is_running());
        assert_eq!(h.presenter.request_count(), 1);
        assert_eq!(h.presenter.statuses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unanswered_dialog_is_raised_again_every_tick() {
        let h = harness();
        h.platform.bring_to_front("com.reddit.frontpage");
        let mut watchdog = WatchdogController::new(h.deps.clone());

        watchdog.start(&fast_settings()).unwrap();
        tokio::time::sleep(Duration::from_millis(2_300)).await;
        watchdog.stop().await.unwrap();

        let ticks = h.presenter.statuses.lock().unwrap().len();
        assert!(ticks >= 2);
        assert_eq!(h.presenter.request_count(), ticks);
        assert_eq!(h.deps.intervention.pending(), 1);
    }

    #[tokio::test]
    async fn restart_inside_the_rate_window_keeps_scores() {
        let h = harness();
        h.db.save_scores(ScoreState::clamped(100, 45)).await.unwrap();
        h.deps.scores.record_shame(&"com.discord".into(), chrono::Utc::now()).await;
        let mut watchdog = WatchdogController::new(h.deps.clone());
        let penalized = ScoreState::clamped(95, 48);

        watchdog.start(&fast_settings()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.deps.scores.scores().await.unwrap(), penalized);

        for _ in 0..3 {
            watchdog.restart(&fast_settings()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        watchdog.stop().await.unwrap();

        assert_eq!(h.deps.scores.scores().await.unwrap(), penalized);
    }

    #[tokio::test]
    async fn stopping_the_loop_keeps_focus_running() {
        let h = harness();
        let mut watchdog = WatchdogController::new(h.deps.clone());
        watchdog.start(&fast_settings()).unwrap();
        h.deps.focus.enable_focus(90).await;

        watchdog.stop().await.unwrap();

        assert!(h.deps.focus.is_active().await);
        assert_eq!(h.platform.snapshot().filter, NotificationFilter::None);
    }
}
