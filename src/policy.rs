//! Which apps count as distracting, and what each one is eligible for.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::models::AppIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntry {
    pub app: AppIdentity,
    /// Classified as distracting by the watchdog and swept by `KILL`.
    #[serde(default = "default_true")]
    pub intervene: bool,
    /// Killed and suspended while focus mode is active.
    #[serde(default = "default_true")]
    pub focus: bool,
}

fn default_true() -> bool {
    true
}

impl PolicyEntry {
    pub fn new(app: &str, intervene: bool, focus: bool) -> Self {
        Self {
            app: AppIdentity::from(app),
            intervene,
            focus,
        }
    }

    /// Default distracting-app list. Short-form video and YouTube are
    /// watched but left out of focus-mode suspension.
    pub fn canonical() -> Vec<PolicyEntry> {
        vec![
            PolicyEntry::new("com.instagram.android", true, true),
            PolicyEntry::new("com.twitter.android", true, true),
            PolicyEntry::new("com.reddit.frontpage", true, true),
            PolicyEntry::new("com.facebook.katana", true, true),
            PolicyEntry::new("com.slack.android", true, true),
            PolicyEntry::new("com.discord", true, true),
            PolicyEntry::new("com.zhiliaoapp.musically", true, false),
            PolicyEntry::new("com.google.android.youtube", true, false),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Eligibility {
    intervene: bool,
    focus: bool,
}

/// Immutable lookup table built from policy entries. Duplicate entries are
/// merged by OR-ing their flags.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    entries: HashMap<AppIdentity, Eligibility>,
}

impl PolicySet {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PolicyEntry>,
    {
        let mut map: HashMap<AppIdentity, Eligibility> = HashMap::new();
        for entry in entries {
            let slot = map.entry(entry.app).or_default();
            slot.intervene |= entry.intervene;
            slot.focus |= entry.focus;
        }
        Self { entries: map }
    }

    pub fn canonical() -> Self {
        Self::from_entries(PolicyEntry::canonical())
    }

    pub fn is_distracting(&self, app: &AppIdentity) -> bool {
        self.entries
            .get(app)
            .map(|flags| flags.intervene)
            .unwrap_or(false)
    }

    /// Apps swept by a manual kill-everything trigger, sorted for stable
    /// effect ordering.
    pub fn intervention_targets(&self) -> Vec<AppIdentity> {
        self.collect(|flags| flags.intervene)
    }

    /// Apps killed and suspended by focus mode.
    pub fn focus_targets(&self) -> Vec<AppIdentity> {
        self.collect(|flags| flags.focus)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect(&self, keep: impl Fn(&Eligibility) -> bool) -> Vec<AppIdentity> {
        let mut apps: Vec<AppIdentity> = self
            .entries
            .iter()
            .filter(|(_, flags)| keep(flags))
            .map(|(app, _)| app.clone())
            .collect();
        apps.sort();
        apps
    }
}

/// Shared, swappable handle so a reload takes effect on the next lookup
/// without restarting the loop.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    inner: Arc<RwLock<Arc<PolicySet>>>,
}

impl PolicyHandle {
    pub fn new(policy: PolicySet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(policy))),
        }
    }

    pub fn current(&self) -> Arc<PolicySet> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, policy: PolicySet) {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(policy);
    }
}
