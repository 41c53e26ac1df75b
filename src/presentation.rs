//! The presentation shell: the intervention dialog and the always-visible
//! status line. The core only talks to [`Presenter`].

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::models::{AppIdentity, ScoreState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InterventionChoice {
    /// Kill the app.
    Comply,
    /// "5 more minutes."
    Defer,
}

/// Background of the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusTone {
    /// Revenue has hit zero.
    Bankrupt,
    /// Cognitive load above 80.
    Overloaded,
    Steady,
}

impl StatusTone {
    pub fn for_scores(scores: ScoreState) -> Self {
        if scores.revenue == 0 {
            StatusTone::Bankrupt
        } else if scores.cognitive_load > 80 {
            StatusTone::Overloaded
        } else {
            StatusTone::Steady
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub revenue: i64,
    pub cognitive_load: i64,
    pub tone: StatusTone,
    pub focus_expires_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn new(scores: ScoreState, focus_expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            revenue: scores.revenue,
            cognitive_load: scores.cognitive_load,
            tone: StatusTone::for_scores(scores),
            focus_expires_at,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revenue: €{} | Load: {}%", self.revenue, self.cognitive_load)?;
        if let Some(expires_at) = self.focus_expires_at {
            write!(
                f,
                " | Focus until {}",
                expires_at.with_timezone(&Local).format("%H:%M")
            )?;
        }
        Ok(())
    }
}

pub trait Presenter: Send + Sync {
    /// Shows the intervention and returns immediately. The receiver resolves
    /// once the user picks; a dropped sender means the dialog went away
    /// without an answer.
    fn request_intervention(
        &self,
        app: &AppIdentity,
        current_revenue: i64,
    ) -> oneshot::Receiver<InterventionChoice>;

    fn render_status(&self, status: &StatusReport);
}

/// Terminal presenter. Prompts and status lines go to stdout; answers come
/// back through the control channel as `COMPLY <app>` / `DEFER <app>`.
/// Raising a prompt again for the same app drops the older one.
#[derive(Default)]
pub struct ConsolePresenter {
    pending: Mutex<HashMap<AppIdentity, oneshot::Sender<InterventionChoice>>>,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers the user's answer. Returns false when nothing was waiting for
    /// `app`.
    pub fn answer(&self, app: &AppIdentity, choice: InterventionChoice) -> bool {
        let sender = lock(&self.pending).remove(app);
        match sender {
            Some(sender) => sender.send(choice).is_ok(),
            None => false,
        }
    }

    pub fn pending_apps(&self) -> Vec<AppIdentity> {
        let mut apps: Vec<AppIdentity> = lock(&self.pending).keys().cloned().collect();
        apps.sort();
        apps
    }
}

impl Presenter for ConsolePresenter {
    fn request_intervention(
        &self,
        app: &AppIdentity,
        current_revenue: i64,
    ) -> oneshot::Receiver<InterventionChoice> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(app.clone(), tx);

        println!("STOP. You're wasting time on {app}.");
        println!("Revenue is €{current_revenue} while you scroll.");
        println!("  COMPLY {app}   kill the app");
        println!("  DEFER {app}    5 more minutes");
        rx
    }

    fn render_status(&self, status: &StatusReport) {
        println!("[bray] {status}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
