use anyhow::Result;
use log::warn;

use crate::db::{helpers::parse_i64, Database, METRICS_NAMESPACE};
use crate::models::ScoreState;

const REVENUE_KEY: &str = "revenue";
const COGNITIVE_LOAD_KEY: &str = "cognitive_load";

impl Database {
    /// Reads the score pair, substituting `defaults` for keys that were never
    /// written or no longer parse.
    pub async fn load_scores(&self, defaults: ScoreState) -> Result<ScoreState> {
        let revenue = self.get(METRICS_NAMESPACE, REVENUE_KEY).await?;
        let load = self.get(METRICS_NAMESPACE, COGNITIVE_LOAD_KEY).await?;

        let revenue = read_counter(revenue, REVENUE_KEY, defaults.revenue);
        let load = read_counter(load, COGNITIVE_LOAD_KEY, defaults.cognitive_load);

        Ok(ScoreState::clamped(revenue, load))
    }

    pub async fn save_scores(&self, scores: ScoreState) -> Result<()> {
        self.put_many(
            METRICS_NAMESPACE,
            vec![
                (REVENUE_KEY.to_string(), scores.revenue.to_string()),
                (COGNITIVE_LOAD_KEY.to_string(), scores.cognitive_load.to_string()),
            ],
        )
        .await
    }
}

fn read_counter(raw: Option<String>, key: &str, default: i64) -> i64 {
    match raw {
        Some(value) => parse_i64(&value, key).unwrap_or_else(|err| {
            warn!("{err:#}; using default {default}");
            default
        }),
        None => default,
    }
}
