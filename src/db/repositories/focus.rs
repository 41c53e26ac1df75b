use anyhow::{Context, Result};

use crate::db::{
    helpers::{parse_bool, parse_datetime},
    Database, FOCUS_NAMESPACE,
};
use crate::models::FocusRecord;
use crate::platform::NotificationFilter;

const EXPIRES_AT_KEY: &str = "expires_at";
const PRIOR_FILTER_KEY: &str = "prior_filter";
const PRIOR_SILENT_KEY: &str = "prior_silent";
const SUSPENDED_KEY: &str = "suspended";

impl Database {
    pub async fn save_focus_session(&self, record: &FocusRecord) -> Result<()> {
        self.put_many(
            FOCUS_NAMESPACE,
            vec![
                (EXPIRES_AT_KEY.to_string(), record.expires_at.to_rfc3339()),
                (
                    PRIOR_FILTER_KEY.to_string(),
                    record.prior_filter.as_str().to_string(),
                ),
                (PRIOR_SILENT_KEY.to_string(), record.prior_silent.to_string()),
                (
                    SUSPENDED_KEY.to_string(),
                    serde_json::to_string(&record.suspended)?,
                ),
            ],
        )
        .await
    }

    /// `None` when no session is stored. A half-written record is an error.
    pub async fn load_focus_session(&self) -> Result<Option<FocusRecord>> {
        let Some(expires_at) = self.get(FOCUS_NAMESPACE, EXPIRES_AT_KEY).await? else {
            return Ok(None);
        };
        let prior_filter = self
            .get(FOCUS_NAMESPACE, PRIOR_FILTER_KEY)
            .await?
            .context("focus session is missing prior_filter")?;
        let prior_silent = self
            .get(FOCUS_NAMESPACE, PRIOR_SILENT_KEY)
            .await?
            .context("focus session is missing prior_silent")?;
        let suspended = match self.get(FOCUS_NAMESPACE, SUSPENDED_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("failed to parse suspended apps")?,
            None => Vec::new(),
        };

        Ok(Some(FocusRecord {
            expires_at: parse_datetime(&expires_at, EXPIRES_AT_KEY)?,
            prior_filter: NotificationFilter::parse(&prior_filter)
                .with_context(|| format!("unknown notification filter {prior_filter:?}"))?,
            prior_silent: parse_bool(&prior_silent, PRIOR_SILENT_KEY)?,
            suspended,
        }))
    }

    pub async fn clear_focus_session(&self) -> Result<()> {
        self.clear_namespace(FOCUS_NAMESPACE).await
    }
}
