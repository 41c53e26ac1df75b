use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::models::{ScoreState, MAX_COGNITIVE_LOAD};

use super::ScoreStore;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const PENALTY_PER_SHAME: i64 = 5;
const MAX_PENALTY: i64 = 50;
const LOAD_PER_SHAME: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Inside the rate window; nothing read or written.
    Skipped,
    Applied {
        before: ScoreState,
        after: ScoreState,
        shame_count: usize,
    },
    /// Storage failed; the stored scores are unchanged and the next tick
    /// retries.
    Failed,
}

/// Folds the shame log into the durable scores, at most once per interval.
///
/// Clones share the rate window, so a restarted loop picks up where the
/// previous one left off.
#[derive(Clone)]
pub struct ScoreUpdater {
    store: ScoreStore,
    min_interval: Duration,
    last_success: Arc<Mutex<Option<Instant>>>,
}

impl ScoreUpdater {
    pub fn new(store: ScoreStore, min_interval: Duration) -> Self {
        Self {
            store,
            min_interval,
            last_success: Arc::new(Mutex::new(None)),
        }
    }

    /// Same store and rate window, new interval.
    pub fn with_min_interval(&self, min_interval: Duration) -> Self {
        Self {
            store: self.store.clone(),
            min_interval,
            last_success: self.last_success.clone(),
        }
    }

    pub fn last_success(&self) -> Option<Instant> {
        *self.lock_last_success()
    }

    pub async fn tick(&self) -> UpdateOutcome {
        self.tick_at(Instant::now()).await
    }

    pub async fn tick_at(&self, now: Instant) -> UpdateOutcome {
        if let Some(last) = self.last_success() {
            if now.saturating_duration_since(last) < self.min_interval {
                return UpdateOutcome::Skipped;
            }
        }

        // The log is read once up front; a shame arriving after this point is
        // counted on the next update.
        let shame_count = self.store.shame_log_size();
        let result = self
            .store
            .read_modify_write(|current| apply_shame(current, shame_count))
            .await;

        match result {
            Ok((before, after)) => {
                *self.lock_last_success() = Some(now);
                if before != after {
                    log_info!(
                        "scores updated: revenue {} -> {}, load {} -> {} ({} shamed apps)",
                        before.revenue,
                        after.revenue,
                        before.cognitive_load,
                        after.cognitive_load,
                        shame_count
                    );
                } else {
                    log_debug!("scores unchanged ({shame_count} shamed apps)");
                }
                UpdateOutcome::Applied {
                    before,
                    after,
                    shame_count,
                }
            }
            Err(err) => {
                log_warn!("score update skipped, storage unavailable: {err:#}");
                UpdateOutcome::Failed
            }
        }
    }

    fn lock_last_success(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_success.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Penalizes revenue and raises cognitive load for every shamed app. The
/// shame log is cumulative, so repeated updates keep pushing both counters
/// toward their bounds.
pub fn apply_shame(current: ScoreState, shame_count: usize) -> ScoreState {
    let shame_count = i64::try_from(shame_count).unwrap_or(i64::MAX);
    let penalty = shame_count.saturating_mul(PENALTY_PER_SHAME).min(MAX_PENALTY);
    let revenue = current.revenue.saturating_sub(penalty).max(0);
    let load = current
        .cognitive_load
        .saturating_add(shame_count.saturating_mul(LOAD_PER_SHAME))
        .min(MAX_COGNITIVE_LOAD);
    ScoreState::clamped(revenue, load)
}
