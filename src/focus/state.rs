use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AppIdentity, FocusRecord};
use crate::platform::NotificationFilter;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FocusStatus {
    #[default]
    Inactive,
    Active,
}

/// What the device looked like before focus mode touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorState {
    pub filter: NotificationFilter,
    pub silent: bool,
}

impl Default for PriorState {
    fn default() -> Self {
        Self {
            filter: NotificationFilter::All,
            silent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FocusState {
    pub status: FocusStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// Bumped on every enable and every revert. An expiry timer only acts if
    /// the generation it was armed with is still current.
    pub generation: u64,
    #[serde(skip)]
    pub prior: PriorState,
    #[serde(skip)]
    pub suspended: Vec<AppIdentity>,
}

impl FocusState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.status == FocusStatus::Active
    }

    /// Enters or extends a session. The prior state is only taken when coming
    /// from `Inactive`; an extension keeps what the first enable captured.
    pub fn activate(
        &mut self,
        expires_at: DateTime<Utc>,
        prior: PriorState,
        suspended: Vec<AppIdentity>,
    ) -> u64 {
        if !self.is_active() {
            self.prior = prior;
            self.suspended.clear();
        }
        for app in suspended {
            if !self.suspended.contains(&app) {
                self.suspended.push(app);
            }
        }
        self.status = FocusStatus::Active;
        self.expires_at = Some(expires_at);
        self.generation += 1;
        self.generation
    }

    /// Restores an active session from its durable record.
    pub fn restore(&mut self, record: &FocusRecord) -> u64 {
        self.status = FocusStatus::Active;
        self.expires_at = Some(record.expires_at);
        self.prior = PriorState {
            filter: record.prior_filter,
            silent: record.prior_silent,
        };
        self.suspended = record.suspended.clone();
        self.generation += 1;
        self.generation
    }

    /// Leaves the session, handing back what has to be undone.
    pub fn deactivate(&mut self) -> Option<(PriorState, Vec<AppIdentity>)> {
        if !self.is_active() {
            return None;
        }
        self.status = FocusStatus::Inactive;
        self.expires_at = None;
        self.generation += 1;
        Some((
            std::mem::take(&mut self.prior),
            std::mem::take(&mut self.suspended),
        ))
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        match (self.status, self.expires_at) {
            (FocusStatus::Active, Some(expires_at)) => {
                (expires_at - now).num_milliseconds().max(0)
            }
            _ => 0,
        }
    }

    pub fn record(&self) -> Option<FocusRecord> {
        if !self.is_active() {
            return None;
        }
        Some(FocusRecord {
            expires_at: self.expires_at?,
            prior_filter: self.prior.filter,
            prior_silent: self.prior.silent,
            suspended: self.suspended.clone(),
        })
    }
}
