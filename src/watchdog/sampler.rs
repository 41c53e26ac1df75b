use std::time::Duration;

use chrono::{TimeDelta, Utc};

use crate::effects::EffectDispatcher;
use crate::models::{AppIdentity, UsageRecord};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Answers "what is in front right now?" from the trailing usage window.
#[derive(Clone)]
pub struct ForegroundSampler {
    effects: EffectDispatcher,
    window: Duration,
}

impl ForegroundSampler {
    pub fn new(effects: EffectDispatcher, window: Duration) -> Self {
        Self { effects, window }
    }

    /// `None` when nothing was used inside the window or the platform query
    /// failed. Never retries.
    pub async fn sample(&self) -> Option<AppIdentity> {
        let window_end = Utc::now();
        let window_start =
            window_end - TimeDelta::from_std(self.window).unwrap_or_else(|_| TimeDelta::seconds(5));

        match self
            .effects
            .query_foreground_usage(window_start, window_end)
            .await
        {
            Ok(records) => {
                let app = most_recent(&records);
                if app.is_none() {
                    log_debug!("no foreground usage in the last {:?}", self.window);
                }
                app
            }
            Err(err) => {
                log_warn!("foreground query failed: {err}");
                None
            }
        }
    }
}

/// The app with the latest `last_used_at`. Ties go to the earlier row.
pub fn most_recent(records: &[UsageRecord]) -> Option<AppIdentity> {
    // `max_by_key` keeps the last maximum, so walk the rows backwards.
    records
        .iter()
        .rev()
        .max_by_key(|record| record.last_used_at)
        .map(|record| record.app.clone())
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::error::{EffectError, EffectResult};
    use crate::platform::{MemoryPlatform, NotificationFilter, Platform};

    struct UnavailablePlatform;

    impl Platform for UnavailablePlatform {
        fn query_foreground_usage(
            &mut self,
            _window_start: DateTime<Utc>,
            _window_end: DateTime<Utc>,
        ) -> EffectResult<Vec<UsageRecord>> {
            Err(EffectError::Unsupported {
                effect: "foreground query",
            })
        }

        fn notification_filter(&self) -> NotificationFilter {
            NotificationFilter::All
        }

        fn set_notification_filter(&mut self, _mode: NotificationFilter) -> EffectResult<()> {
            Ok(())
        }

        fn ringer_silent(&self) -> bool {
            false
        }

        fn set_ringer_silent(&mut self, _silent: bool) -> EffectResult<()> {
            Ok(())
        }

        fn terminate_background_processes(&mut self, _app: &AppIdentity) -> EffectResult<()> {
            Ok(())
        }

        fn set_app_suspended(&mut self, _app: &AppIdentity, _suspended: bool) -> EffectResult<()> {
            Ok(())
        }

        fn has_elevated_authority(&self) -> bool {
            false
        }
    }

    #[test]
    fn latest_row_wins() {
        let now = Utc::now();
        let rows = vec![
            UsageRecord::new("com.slack.android", now - TimeDelta::seconds(4)),
            UsageRecord::new("com.reddit.frontpage", now - TimeDelta::seconds(1)),
            UsageRecord::new("com.android.launcher", now - TimeDelta::seconds(3)),
        ];

        assert_eq!(most_recent(&rows), Some("com.reddit.frontpage".into()));
        assert_eq!(most_recent(&[]), None);
    }

    #[test]
    fn tie_goes_to_the_first_row() {
        let at = Utc::now();
        let rows = vec![
            UsageRecord::new("com.discord", at),
            UsageRecord::new("com.android.launcher", at - TimeDelta::seconds(2)),
            UsageRecord::new("com.slack.android", at),
        ];

        assert_eq!(most_recent(&rows), Some("com.discord".into()));
    }

    #[tokio::test]
    async fn stale_usage_is_outside_the_window() {
        let platform = MemoryPlatform::new();
        platform.push_usage(UsageRecord::new(
            "com.instagram.android",
            Utc::now() - TimeDelta::seconds(30),
        ));
        let sampler = ForegroundSampler::new(
            EffectDispatcher::spawn(platform.clone()).unwrap(),
            Duration::from_secs(5),
        );

        assert_eq!(sampler.sample().await, None);

        platform.bring_to_front("com.instagram.android");
        assert_eq!(sampler.sample().await, Some("com.instagram.android".into()));
    }

    #[tokio::test]
    async fn query_failure_reads_as_no_sample() {
        let sampler = ForegroundSampler::new(
            EffectDispatcher::spawn(UnavailablePlatform).unwrap(),
            Duration::from_secs(5),
        );

        assert_eq!(sampler.sample().await, None);
    }
}
