use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::policy::PolicyEntry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlatformKind {
    /// Real process control through sysinfo and the configured hooks.
    Desktop,
    /// In-process simulation; effects are recorded, nothing is touched.
    Simulate,
}

impl Default for PlatformKind {
    fn default() -> Self {
        PlatformKind::Desktop
    }
}

/// External commands the desktop platform shells out to. An empty argv
/// disables that hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DesktopHooks {
    /// Prints the pid of the focused window on stdout.
    pub foreground_probe: Vec<String>,
    pub block_notifications: Vec<String>,
    pub allow_notifications: Vec<String>,
    pub silence_ringer: Vec<String>,
    pub restore_ringer: Vec<String>,
}

impl Default for DesktopHooks {
    fn default() -> Self {
        Self {
            foreground_probe: vec![
                "xdotool".into(),
                "getactivewindow".into(),
                "getwindowpid".into(),
            ],
            block_notifications: Vec::new(),
            allow_notifications: Vec::new(),
            silence_ringer: Vec::new(),
            restore_ringer: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogSettings {
    pub tick_interval_secs: u64,
    /// Minimum spacing between two score updates.
    pub score_update_interval_secs: u64,
    /// Trailing window handed to the foreground usage query.
    pub sample_window_secs: u64,
    pub sample_timeout_secs: u64,
    pub focus_default_minutes: u64,
    /// A persisted focus session expiring within this many seconds of boot is
    /// reverted right away instead of re-armed.
    pub focus_resume_grace_secs: u64,
    pub initial_revenue: i64,
    pub initial_cognitive_load: i64,
    pub platform: PlatformKind,
    /// Stand-in for a device-admin grant: allows suspending other apps.
    pub elevated_authority: bool,
    pub policy: Vec<PolicyEntry>,
    pub desktop: DesktopHooks,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            score_update_interval_secs: 300,
            sample_window_secs: 5,
            sample_timeout_secs: 10,
            focus_default_minutes: 90,
            focus_resume_grace_secs: 30,
            initial_revenue: 0,
            initial_cognitive_load: 45,
            platform: PlatformKind::default(),
            elevated_authority: false,
            policy: PolicyEntry::canonical(),
            desktop: DesktopHooks::default(),
        }
    }
}

impl WatchdogSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn score_update_interval(&self) -> Duration {
        Duration::from_secs(self.score_update_interval_secs)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_secs(self.sample_window_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs.max(1))
    }

    pub fn focus_resume_grace(&self) -> Duration {
        Duration::from_secs(self.focus_resume_grace_secs)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<WatchdogSettings>,
}

impl SettingsStore {
    /// Loads `path`, falling back to defaults when the file is missing or
    /// unreadable. A missing file is seeded with the defaults so it can be
    /// edited by hand.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings at {}: {err}; using defaults",
                    path.display()
                );
                WatchdogSettings::default()
            })
        } else {
            let defaults = WatchdogSettings::default();
            write_settings(&path, &defaults)?;
            defaults
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> WatchdogSettings {
        self.read().clone()
    }

    pub fn update<F>(&self, apply: F) -> Result<WatchdogSettings>
    where
        F: FnOnce(&mut WatchdogSettings),
    {
        let mut guard = self.write();
        apply(&mut guard);
        write_settings(&self.path, &guard)?;
        Ok(guard.clone())
    }

    /// Re-reads the file. On a parse error the cached settings stay in place.
    pub fn reload(&self) -> Result<WatchdogSettings> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: WatchdogSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings at {}", self.path.display()))?;
        let mut guard = self.write();
        *guard = data.clone();
        Ok(data)
    }

    fn read(&self) -> RwLockReadGuard<'_, WatchdogSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, WatchdogSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn write_settings(path: &Path, data: &WatchdogSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_seeded_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();

        assert!(path.exists());
        assert_eq!(store.current(), WatchdogSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "tickIntervalSecs": 5, "elevatedAuthority": true }"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().current();

        assert_eq!(settings.tick_interval_secs, 5);
        assert!(settings.elevated_authority);
        assert_eq!(settings.focus_default_minutes, 90);
        assert_eq!(settings.policy, PolicyEntry::canonical());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();

        assert_eq!(store.current(), WatchdogSettings::default());
        assert!(store.reload().is_err());
        assert_eq!(store.current(), WatchdogSettings::default());
    }

    #[test]
    fn update_persists_and_reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store.update(|s| s.focus_default_minutes = 25).unwrap();
        assert_eq!(SettingsStore::new(path.clone()).unwrap().current().focus_default_minutes, 25);

        let mut edited = store.current();
        edited.tick_interval_secs = 15;
        fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();

        assert_eq!(store.reload().unwrap().tick_interval_secs, 15);
        assert_eq!(store.current().tick_interval_secs, 15);
    }
}
