//! OS-facing collaborators. Everything the watchdog does to the outside world
//! goes through [`Platform`], always on the effect thread.

pub mod desktop;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EffectResult;
use crate::models::{AppIdentity, UsageRecord};

pub use desktop::DesktopPlatform;
pub use memory::{EffectCall, MemoryPlatform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationFilter {
    /// Every notification may interrupt.
    All,
    /// Do-not-disturb: nothing interrupts.
    None,
}

impl NotificationFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationFilter::All => "all",
            NotificationFilter::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(NotificationFilter::All),
            "none" => Some(NotificationFilter::None),
            _ => None,
        }
    }
}

pub trait Platform: Send {
    /// Usage rows whose last use falls inside `[window_start, window_end]`.
    fn query_foreground_usage(
        &mut self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EffectResult<Vec<UsageRecord>>;

    fn notification_filter(&self) -> NotificationFilter;

    fn set_notification_filter(&mut self, mode: NotificationFilter) -> EffectResult<()>;

    fn ringer_silent(&self) -> bool;

    fn set_ringer_silent(&mut self, silent: bool) -> EffectResult<()>;

    /// Best effort. Nothing running under `app` is a success.
    fn terminate_background_processes(&mut self, app: &AppIdentity) -> EffectResult<()>;

    /// Fails with `AuthorityMissing` unless elevated authority is held.
    fn set_app_suspended(&mut self, app: &AppIdentity, suspended: bool) -> EffectResult<()>;

    fn has_elevated_authority(&self) -> bool;
}
