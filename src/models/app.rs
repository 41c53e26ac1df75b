use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of an installed application (package name, process
/// name). Compared byte for byte; never normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppIdentity(String);

impl AppIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AppIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One row of foreground usage as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub app: AppIdentity,
    pub last_used_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(app: impl Into<AppIdentity>, last_used_at: DateTime<Utc>) -> Self {
        Self {
            app: app.into(),
            last_used_at,
        }
    }
}
