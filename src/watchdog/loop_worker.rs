use std::sync::Arc;

use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::focus::FocusModeController;
use crate::intervention::{InterventionController, SampleOutcome};
use crate::models::AppIdentity;
use crate::presentation::{Presenter, StatusReport};
use crate::scoring::{ScoreStore, ScoreUpdater, UpdateOutcome};

use super::sampler::ForegroundSampler;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Everything one tick touches. Owned by the loop task.
pub struct TickContext {
    pub sampler: ForegroundSampler,
    pub intervention: InterventionController,
    pub updater: ScoreUpdater,
    pub scores: ScoreStore,
    pub focus: FocusModeController,
    pub presenter: Arc<dyn Presenter>,
    pub sample_timeout: Duration,
}

#[derive(Debug)]
pub struct TickReport {
    pub foreground: Option<AppIdentity>,
    pub intervention_requested: bool,
    pub update: UpdateOutcome,
    pub status: StatusReport,
}

pub async fn watchdog_loop(
    mut ctx: TickContext,
    tick_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!("watchdog loop started (every {:?})", tick_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = run_tick(&mut ctx).await;
                log_debug!(
                    "tick: foreground={:?} intervention={} update={:?}",
                    report.foreground.as_ref().map(AppIdentity::as_str),
                    report.intervention_requested,
                    report.update
                );
            }
            _ = cancel_token.cancelled() => {
                log_info!("watchdog loop shutting down");
                break;
            }
        }
    }
}

/// One pass: sample, maybe intervene, fold shame into the scores, repaint
/// the status surface. A failure in any step only degrades that step.
pub async fn run_tick(ctx: &mut TickContext) -> TickReport {
    let foreground = match time::timeout(ctx.sample_timeout, ctx.sampler.sample()).await {
        Ok(sample) => sample,
        Err(_) => {
            log_warn!("foreground sample timed out (> {:?})", ctx.sample_timeout);
            None
        }
    };

    ctx.intervention.begin_tick();
    let intervention_requested = match &foreground {
        Some(app) => matches!(
            ctx.intervention.on_sample(app).await,
            SampleOutcome::Requested(_)
        ),
        None => false,
    };

    let update = ctx.updater.tick().await;

    let scores = match update {
        UpdateOutcome::Applied { after, .. } => after,
        _ => ctx.scores.scores_or_default().await,
    };
    let status = StatusReport::new(scores, ctx.focus.expires_at().await);
    ctx.presenter.render_status(&status);

    TickReport {
        foreground,
        intervention_requested,
        update,
        status,
    }
}
