use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppIdentity;

pub const MAX_COGNITIVE_LOAD: i64 = 100;

/// Durable score pair shown on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreState {
    pub revenue: i64,
    pub cognitive_load: i64,
}

impl ScoreState {
    /// Builds a state with both counters pulled back into range.
    pub fn clamped(revenue: i64, cognitive_load: i64) -> Self {
        Self {
            revenue: revenue.max(0),
            cognitive_load: cognitive_load.clamp(0, MAX_COGNITIVE_LOAD),
        }
    }
}

/// A dismissed intervention: the user chose to keep using `app`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShameEvent {
    pub app: AppIdentity,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_pulls_counters_into_range() {
        assert_eq!(ScoreState::clamped(-3, 140), ScoreState { revenue: 0, cognitive_load: 100 });
        assert_eq!(ScoreState::clamped(12, -1), ScoreState { revenue: 12, cognitive_load: 0 });
        assert_eq!(ScoreState::clamped(7, 45), ScoreState { revenue: 7, cognitive_load: 45 });
    }
}
