use anyhow::Result;

use crate::db::{Database, SHAME_NAMESPACE};
use crate::models::ShameEvent;

impl Database {
    /// Overwrites the stored timestamp for the event's app.
    pub async fn record_shame(&self, event: &ShameEvent) -> Result<()> {
        self.put(
            SHAME_NAMESPACE,
            event.app.as_str(),
            &event.recorded_at.to_rfc3339(),
        )
        .await
    }
}
