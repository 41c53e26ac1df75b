use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AppIdentity;
use crate::platform::NotificationFilter;

/// Durable copy of an active focus session, enough to finish it after a
/// restart: when it ends and what to restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRecord {
    pub expires_at: DateTime<Utc>,
    pub prior_filter: NotificationFilter,
    pub prior_silent: bool,
    /// Apps actually suspended, so they are released even if the policy
    /// changed in between.
    pub suspended: Vec<AppIdentity>,
}
