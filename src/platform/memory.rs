use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};

use crate::error::{EffectError, EffectResult};
use crate::models::{AppIdentity, UsageRecord};

use super::{NotificationFilter, Platform};

/// Every effect the simulated platform was asked to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectCall {
    SetNotificationFilter(NotificationFilter),
    SetRingerSilent(bool),
    Terminate(AppIdentity),
    SetSuspended(AppIdentity, bool),
}

#[derive(Debug, Clone)]
pub struct MemoryState {
    pub usage: Vec<UsageRecord>,
    /// App that stays in front until replaced or cleared.
    pub foreground: Option<AppIdentity>,
    pub filter: NotificationFilter,
    pub ringer_silent: bool,
    pub elevated_authority: bool,
    pub running: BTreeSet<AppIdentity>,
    pub protected: BTreeSet<AppIdentity>,
    pub suspended: BTreeSet<AppIdentity>,
    pub calls: Vec<EffectCall>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            usage: Vec::new(),
            foreground: None,
            filter: NotificationFilter::All,
            ringer_silent: false,
            elevated_authority: false,
            running: BTreeSet::new(),
            protected: BTreeSet::new(),
            suspended: BTreeSet::new(),
            calls: Vec::new(),
        }
    }
}

/// In-process platform. Clones share state, so one clone can be handed to
/// the effect thread while another drives and inspects it.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authority(elevated_authority: bool) -> Self {
        let platform = Self::new();
        platform.lock().elevated_authority = elevated_authority;
        platform
    }

    /// Puts `app` in front: every later query reports it as just used, until
    /// another app replaces it or [`MemoryPlatform::clear_usage`] runs.
    pub fn bring_to_front(&self, app: impl Into<AppIdentity>) {
        let app = app.into();
        let mut state = self.lock();
        state.running.insert(app.clone());
        state.foreground = Some(app);
    }

    pub fn push_usage(&self, record: UsageRecord) {
        self.lock().usage.push(record);
    }

    pub fn clear_usage(&self) {
        let mut state = self.lock();
        state.usage.clear();
        state.foreground = None;
    }

    pub fn launch(&self, app: impl Into<AppIdentity>) {
        self.lock().running.insert(app.into());
    }

    /// Marks `app` as immune to termination, like a system package.
    pub fn protect(&self, app: impl Into<AppIdentity>) {
        self.lock().protected.insert(app.into());
    }

    pub fn set_filter(&self, filter: NotificationFilter) {
        self.lock().filter = filter;
    }

    pub fn set_silent(&self, silent: bool) {
        self.lock().ringer_silent = silent;
    }

    pub fn grant_authority(&self, granted: bool) {
        self.lock().elevated_authority = granted;
    }

    pub fn snapshot(&self) -> MemoryState {
        self.lock().clone()
    }

    pub fn calls(&self) -> Vec<EffectCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Platform for MemoryPlatform {
    fn query_foreground_usage(
        &mut self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EffectResult<Vec<UsageRecord>> {
        let state = self.lock();
        let mut rows: Vec<UsageRecord> = state
            .usage
            .iter()
            .filter(|record| record.last_used_at >= window_start && record.last_used_at <= window_end)
            .cloned()
            .collect();
        if let Some(app) = &state.foreground {
            rows.push(UsageRecord::new(app.clone(), window_end));
        }
        Ok(rows)
    }

    fn notification_filter(&self) -> NotificationFilter {
        self.lock().filter
    }

    fn set_notification_filter(&mut self, mode: NotificationFilter) -> EffectResult<()> {
        let mut state = self.lock();
        state.calls.push(EffectCall::SetNotificationFilter(mode));
        state.filter = mode;
        Ok(())
    }

    fn ringer_silent(&self) -> bool {
        self.lock().ringer_silent
    }

    fn set_ringer_silent(&mut self, silent: bool) -> EffectResult<()> {
        let mut state = self.lock();
        state.calls.push(EffectCall::SetRingerSilent(silent));
        state.ringer_silent = silent;
        Ok(())
    }

    fn terminate_background_processes(&mut self, app: &AppIdentity) -> EffectResult<()> {
        let mut state = self.lock();
        state.calls.push(EffectCall::Terminate(app.clone()));
        if state.protected.contains(app) {
            return Err(EffectError::denied("terminate", app.as_str(), "protected app"));
        }
        state.running.remove(app);
        Ok(())
    }

    fn set_app_suspended(&mut self, app: &AppIdentity, suspended: bool) -> EffectResult<()> {
        let mut state = self.lock();
        if !state.elevated_authority {
            return Err(EffectError::AuthorityMissing {
                effect: if suspended { "suspend" } else { "unsuspend" },
            });
        }
        state.calls.push(EffectCall::SetSuspended(app.clone(), suspended));
        if suspended {
            state.suspended.insert(app.clone());
        } else {
            state.suspended.remove(app);
        }
        Ok(())
    }

    fn has_elevated_authority(&self) -> bool {
        self.lock().elevated_authority
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn usage_query_honours_the_window() {
        let mut platform = MemoryPlatform::new();
        let now = Utc::now();
        platform.push_usage(UsageRecord::new("com.old.app", now - Duration::seconds(30)));
        platform.push_usage(UsageRecord::new("com.new.app", now - Duration::seconds(2)));

        let rows = platform
            .query_foreground_usage(now - Duration::seconds(5), now)
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].app.as_str(), "com.new.app");
    }

    #[test]
    fn protected_apps_refuse_termination() {
        let mut platform = MemoryPlatform::new();
        platform.launch("com.android.systemui");
        platform.protect("com.android.systemui");

        let err = platform
            .terminate_background_processes(&"com.android.systemui".into())
            .unwrap_err();

        assert!(err.is_expected());
        assert!(platform.snapshot().running.contains(&AppIdentity::from("com.android.systemui")));
    }

    #[test]
    fn suspension_needs_authority() {
        let mut platform = MemoryPlatform::new();
        let app = AppIdentity::from("com.discord");

        assert!(matches!(
            platform.set_app_suspended(&app, true),
            Err(EffectError::AuthorityMissing { .. })
        ));

        platform.grant_authority(true);
        platform.set_app_suspended(&app, true).unwrap();
        assert!(platform.snapshot().suspended.contains(&app));
    }

    #[test]
    fn foreground_app_stays_in_front() {
        let mut platform = MemoryPlatform::new();
        platform.bring_to_front("com.instagram.android");
        let later = Utc::now() + Duration::minutes(3);

        let rows = platform
            .query_foreground_usage(later - Duration::seconds(5), later)
            .unwrap();
        assert_eq!(rows, vec![UsageRecord::new("com.instagram.android", later)]);

        platform.clear_usage();
        assert!(platform.query_foreground_usage(later - Duration::seconds(5), later).unwrap().is_empty());
    }
}
