use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::effects::EffectDispatcher;
use crate::models::{AppIdentity, ShameEvent};
use crate::policy::PolicyHandle;
use crate::presentation::{InterventionChoice, Presenter};
use crate::scoring::ScoreStore;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What became of one intervention once the user answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The user agreed; `terminated` is false when the platform refused.
    Complied { terminated: bool },
    Deferred(ShameEvent),
    /// The dialog closed without a choice.
    Dismissed,
}

#[derive(Debug)]
pub enum SampleOutcome {
    NotDistracting,
    /// A dialog for this app already went up during the current tick.
    AlreadyPending,
    /// A dialog went up; the handle resolves after the user answers.
    Requested(JoinHandle<Resolution>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillReport {
    pub terminated: usize,
    pub refused: usize,
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    prompt: u64,
    tick: u64,
}

#[derive(Clone)]
pub struct InterventionController {
    policy: PolicyHandle,
    presenter: Arc<dyn Presenter>,
    effects: EffectDispatcher,
    scores: ScoreStore,
    in_flight: Arc<Mutex<HashMap<AppIdentity, Outstanding>>>,
    tick: Arc<AtomicU64>,
    next_prompt: Arc<AtomicU64>,
}

impl InterventionController {
    pub fn new(
        policy: PolicyHandle,
        presenter: Arc<dyn Presenter>,
        effects: EffectDispatcher,
        scores: ScoreStore,
    ) -> Self {
        Self {
            policy,
            presenter,
            effects,
            scores,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tick: Arc::new(AtomicU64::new(0)),
            next_prompt: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Marks the start of a watchdog tick. A dialog left unanswered from an
    /// earlier tick is raised again on the next distracting sample.
    pub fn begin_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Classifies a foreground sample and, for a distracting app, raises at
    /// most one intervention per tick. Never waits for the user.
    pub async fn on_sample(&self, app: &AppIdentity) -> SampleOutcome {
        if !self.policy.current().is_distracting(app) {
            return SampleOutcome::NotDistracting;
        }

        let tick = self.tick.load(Ordering::Relaxed);
        let prompt = {
            let mut in_flight = self.lock_in_flight();
            if in_flight.get(app).is_some_and(|outstanding| outstanding.tick == tick) {
                log_debug!("intervention for {app} already raised this tick");
                return SampleOutcome::AlreadyPending;
            }
            let prompt = self.next_prompt.fetch_add(1, Ordering::Relaxed);
            if in_flight.insert(app.clone(), Outstanding { prompt, tick }).is_some() {
                log_debug!("intervention for {app} still unanswered; raising it again");
            }
            prompt
        };

        let revenue = self.scores.scores_or_default().await.revenue;
        log_info!("distracting app in foreground: {app}; requesting intervention");
        let response = self.presenter.request_intervention(app, revenue);

        let controller = self.clone();
        let app = app.clone();
        SampleOutcome::Requested(tokio::spawn(async move {
            let resolution = match response.await {
                Ok(choice) => controller.resolve(&app, choice).await,
                Err(_) => {
                    log_debug!("intervention for {app} dismissed without an answer");
                    Resolution::Dismissed
                }
            };
            // A newer prompt for the same app may have replaced this one.
            let mut in_flight = controller.lock_in_flight();
            if in_flight.get(&app).is_some_and(|outstanding| outstanding.prompt == prompt) {
                in_flight.remove(&app);
            }
            resolution
        }))
    }

    /// Kills every watched app right now, independent of sampling.
    pub async fn kill_all(&self) -> KillReport {
        let mut report = KillReport::default();
        for app in self.policy.current().intervention_targets() {
            if self.terminate(&app).await {
                report.terminated += 1;
            } else {
                report.refused += 1;
            }
        }
        log_info!(
            "kill sweep finished: {} terminated, {} refused",
            report.terminated,
            report.refused
        );
        report
    }

    pub fn pending(&self) -> usize {
        self.lock_in_flight().len()
    }

    async fn resolve(&self, app: &AppIdentity, choice: InterventionChoice) -> Resolution {
        match choice {
            InterventionChoice::Comply => Resolution::Complied {
                terminated: self.terminate(app).await,
            },
            InterventionChoice::Defer => {
                let event = self.scores.record_shame(app, Utc::now()).await;
                log_info!("{app} deferred; shame log now holds {} apps", self.scores.shame_log_size());
                Resolution::Deferred(event)
            }
        }
    }

    async fn terminate(&self, app: &AppIdentity) -> bool {
        match self.effects.terminate(app).await {
            Ok(()) => true,
            Err(err) if err.is_expected() => {
                log_debug!("{err}");
                false
            }
            Err(err) => {
                log_warn!("terminating {app} failed: {err}");
                false
            }
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<AppIdentity, Outstanding>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use crate::models::AppIdentity;
    use crate::presentation::{InterventionChoice, Presenter, StatusReport};

    /// Presenter that records every request and hands the answer channel to
    /// the test.
    #[derive(Default)]
    pub struct ScriptedPresenter {
        pub requests: Mutex<Vec<(AppIdentity, i64)>>,
        pub answers: Mutex<Vec<oneshot::Sender<InterventionChoice>>>,
        pub statuses: Mutex<Vec<StatusReport>>,
    }

    impl ScriptedPresenter {
        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn answer_next(&self, choice: InterventionChoice) {
            let sender = self.answers.lock().unwrap().remove(0);
            sender.send(choice).unwrap();
        }

        pub fn dismiss_next(&self) {
            drop(self.answers.lock().unwrap().remove(0));
        }
    }

    impl Presenter for ScriptedPresenter {
        fn request_intervention(
            &self,
            app: &AppIdentity,
            current_revenue: i64,
        ) -> oneshot::Receiver<InterventionChoice> {
            let (tx, rx) = oneshot::channel();
            self.requests.lock().unwrap().push((app.clone(), current_revenue));
            self.answers.lock().unwrap().push(tx);
            rx
        }

        fn render_status(&self, status: &StatusReport) {
            self.statuses.lock().unwrap().push(status.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedPresenter;
    use super::*;
    use crate::db::Database;
    use crate::models::ScoreState;
    use crate::platform::{EffectCall, MemoryPlatform};
    use crate::policy::PolicySet;

    struct Harness {
        _dir: tempfile::TempDir,
        platform: MemoryPlatform,
        presenter: Arc<ScriptedPresenter>,
        scores: ScoreStore,
        controller: InterventionController,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bray.sqlite3")).unwrap();
        let scores = ScoreStore::new(db, ScoreState::clamped(0, 45));
        let platform = MemoryPlatform::new();
        let effects = EffectDispatcher::spawn(platform.clone()).unwrap();
        let presenter = Arc::new(ScriptedPresenter::default());
        let controller = InterventionController::new(
            PolicyHandle::new(PolicySet::canonical()),
            presenter.clone(),
            effects,
            scores.clone(),
        );
        Harness {
            _dir: dir,
            platform,
            presenter,
            scores,
            controller,
        }
    }

    #[tokio::test]
    async fn unknown_app_is_left_alone() {
        let h = harness();

        let outcome = h.controller.on_sample(&"com.unknown.app".into()).await;

        assert!(matches!(outcome, SampleOutcome::NotDistracting));
        assert_eq!(h.presenter.request_count(), 0);
    }

    #[tokio::test]
    async fn one_request_per_outstanding_dialog() {
        let h = harness();
        let app = AppIdentity::from("com.instagram.android");

        let first = h.controller.on_sample(&app).await;
        let second = h.controller.on_sample(&app).await;

        assert!(matches!(first, SampleOutcome::Requested(_)));
        assert!(matches!(second, SampleOutcome::AlreadyPending));
        assert_eq!(h.presenter.request_count(), 1);
        assert_eq!(h.presenter.requests.lock().unwrap()[0], (app, 0));
    }

    #[tokio::test]
    async fn unanswered_dialog_is_raised_again_next_tick() {
        let h = harness();
        let app = AppIdentity::from("com.instagram.android");

        let SampleOutcome::Requested(stale) = h.controller.on_sample(&app).await else {
            panic!("expected a request");
        };
        h.controller.begin_tick();
        let SampleOutcome::Requested(fresh) = h.controller.on_sample(&app).await else {
            panic!("expected the dialog to be raised again");
        };
        assert_eq!(h.presenter.request_count(), 2);
        assert_eq!(h.controller.pending(), 1);

        h.presenter.dismiss_next();
        assert_eq!(stale.await.unwrap(), Resolution::Dismissed);
        assert_eq!(h.controller.pending(), 1);

        h.presenter.answer_next(InterventionChoice::Defer);
        assert!(matches!(fresh.await.unwrap(), Resolution::Deferred(_)));
        assert_eq!(h.controller.pending(), 0);
        assert_eq!(h.scores.shame_log_size(), 1);
    }

    #[tokio::test]
    async fn comply_terminates_the_app() {
        let h = harness();
        let app = AppIdentity::from("com.twitter.android");
        h.platform.launch(app.clone());

        let SampleOutcome::Requested(handle) = h.controller.on_sample(&app).await else {
            panic!("expected a request");
        };
        h.presenter.answer_next(InterventionChoice::Comply);

        assert_eq!(handle.await.unwrap(), Resolution::Complied { terminated: true });
        assert!(!h.platform.snapshot().running.contains(&app));
        assert_eq!(h.scores.shame_log_size(), 0);
        assert_eq!(h.controller.pending(), 0);
    }

    #[tokio::test]
    async fn refused_kill_is_not_an_error() {
        let h = harness();
        let app = AppIdentity::from("com.slack.android");
        h.platform.protect(app.clone());

        let SampleOutcome::Requested(handle) = h.controller.on_sample(&app).await else {
            panic!("expected a request");
        };
        h.presenter.answer_next(InterventionChoice::Comply);

        assert_eq!(handle.await.unwrap(), Resolution::Complied { terminated: false });
    }

    #[tokio::test]
    async fn defer_records_shame_and_allows_a_new_prompt() {
        let h = harness();
        let app = AppIdentity::from("com.reddit.frontpage");

        let SampleOutcome::Requested(handle) = h.controller.on_sample(&app).await else {
            panic!("expected a request");
        };
        h.presenter.answer_next(InterventionChoice::Defer);
        let resolution = handle.await.unwrap();

        assert!(matches!(resolution, Resolution::Deferred(ShameEvent { ref app, .. }) if app.as_str() == "com.reddit.frontpage"));
        assert_eq!(h.scores.shame_log_size(), 1);
        assert!(h.platform.calls().is_empty());
        assert!(matches!(h.controller.on_sample(&app).await, SampleOutcome::Requested(_)));
    }

    #[tokio::test]
    async fn dismissed_dialog_changes_nothing() {
        let h = harness();
        let app = AppIdentity::from("com.discord");

        let SampleOutcome::Requested(handle) = h.controller.on_sample(&app).await else {
            panic!("expected a request");
        };
        h.presenter.dismiss_next();

        assert_eq!(handle.await.unwrap(), Resolution::Dismissed);
        assert_eq!(h.scores.shame_log_size(), 0);
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn kill_all_sweeps_every_watched_app() {
        let h = harness();
        h.platform.protect("com.discord");

        let report = h.controller.kill_all().await;

        assert_eq!(report, KillReport { terminated: 7, refused: 1 });
        let terminated: Vec<_> = h
            .platform
            .calls()
            .into_iter()
            .filter(|call| matches!(call, EffectCall::Terminate(_)))
            .collect();
        assert_eq!(terminated.len(), 8);
    }
}
