use std::process::Command;

use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

use crate::error::{EffectError, EffectResult};
use crate::models::{AppIdentity, UsageRecord};
use crate::settings::DesktopHooks;

use super::{NotificationFilter, Platform};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Desktop process control. Apps are identified by process name; the
/// foreground app, do-not-disturb and muting go through the configured
/// external hooks.
pub struct DesktopPlatform {
    system: System,
    hooks: DesktopHooks,
    elevated_authority: bool,
    filter: NotificationFilter,
    ringer_silent: bool,
    own_pid: u32,
}

impl DesktopPlatform {
    pub fn new(hooks: DesktopHooks, elevated_authority: bool) -> Self {
        Self {
            system: System::new(),
            hooks,
            elevated_authority,
            filter: NotificationFilter::All,
            ringer_silent: false,
            own_pid: std::process::id(),
        }
    }

    fn refresh_all(&mut self) {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::new());
    }

    /// Pids of every process named `app`, excluding this process.
    fn pids_for(&self, app: &AppIdentity) -> Vec<Pid> {
        self.system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != self.own_pid && process.name().to_string_lossy() == app.as_str()
            })
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn foreground_pid(&self) -> EffectResult<Option<u32>> {
        let output = run_hook("foreground query", &self.hooks.foreground_probe)?;
        let Some(output) = output else {
            return Err(EffectError::Unsupported {
                effect: "foreground query",
            });
        };
        Ok(output.trim().parse::<u32>().ok())
    }
}

impl Platform for DesktopPlatform {
    fn query_foreground_usage(
        &mut self,
        _window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EffectResult<Vec<UsageRecord>> {
        // The probe only knows the focused window right now, which always
        // falls inside the trailing window.
        let Some(pid) = self.foreground_pid()? else {
            return Ok(Vec::new());
        };

        let pid = Pid::from_u32(pid);
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        let records = self
            .system
            .process(pid)
            .map(|process| {
                let name = process.name().to_string_lossy().into_owned();
                vec![UsageRecord::new(name, window_end)]
            })
            .unwrap_or_default();
        Ok(records)
    }

    fn notification_filter(&self) -> NotificationFilter {
        self.filter
    }

    fn set_notification_filter(&mut self, mode: NotificationFilter) -> EffectResult<()> {
        let hook = match mode {
            NotificationFilter::All => &self.hooks.allow_notifications,
            NotificationFilter::None => &self.hooks.block_notifications,
        };
        if run_hook("notification filter", hook)?.is_none() {
            log_debug!("no notification hook configured; filter {} tracked only", mode.as_str());
        }
        self.filter = mode;
        Ok(())
    }

    fn ringer_silent(&self) -> bool {
        self.ringer_silent
    }

    fn set_ringer_silent(&mut self, silent: bool) -> EffectResult<()> {
        let hook = if silent {
            &self.hooks.silence_ringer
        } else {
            &self.hooks.restore_ringer
        };
        if run_hook("ringer", hook)?.is_none() {
            log_debug!("no ringer hook configured; silent={silent} tracked only");
        }
        self.ringer_silent = silent;
        Ok(())
    }

    fn terminate_background_processes(&mut self, app: &AppIdentity) -> EffectResult<()> {
        self.refresh_all();
        let pids = self.pids_for(app);
        if pids.is_empty() {
            return Ok(());
        }

        let mut refused = 0usize;
        for pid in &pids {
            let killed = self
                .system
                .process(*pid)
                .map(|process| process.kill())
                .unwrap_or(true);
            if !killed {
                refused += 1;
            }
        }

        if refused == pids.len() {
            return Err(EffectError::denied(
                "terminate",
                app.as_str(),
                format!("{refused} process(es) refused the signal"),
            ));
        }
        if refused > 0 {
            log_warn!("{refused} of {} processes for {app} survived termination", pids.len());
        }
        Ok(())
    }

    fn set_app_suspended(&mut self, app: &AppIdentity, suspended: bool) -> EffectResult<()> {
        let effect = if suspended { "suspend" } else { "unsuspend" };
        if !self.elevated_authority {
            return Err(EffectError::AuthorityMissing { effect });
        }

        self.refresh_all();
        let signal = if suspended {
            Signal::Stop
        } else {
            Signal::Continue
        };

        let pids = self.pids_for(app);
        let system = &self.system;
        let outcome = signal_each(&pids, signal, |pid, signal| {
            system.process(pid).map_or(Some(true), |process| process.kill_with(signal))
        });
        match outcome {
            Ok(()) => Ok(()),
            Err(SignalRefusal::Denied(pid)) => {
                Err(EffectError::denied(effect, app.as_str(), format!("pid {pid} refused")))
            }
            Err(SignalRefusal::Unsupported) => Err(EffectError::Unsupported { effect }),
        }
    }

    fn has_elevated_authority(&self) -> bool {
        self.elevated_authority
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SignalRefusal {
    Denied(Pid),
    Unsupported,
}

/// Signals every pid in turn. When a stop is refused part way, the pids
/// already stopped are continued so a failed suspend leaves nothing frozen.
fn signal_each<F>(pids: &[Pid], signal: Signal, mut send: F) -> Result<(), SignalRefusal>
where
    F: FnMut(Pid, Signal) -> Option<bool>,
{
    for (index, pid) in pids.iter().enumerate() {
        let refusal = match send(*pid, signal) {
            Some(true) => continue,
            Some(false) => SignalRefusal::Denied(*pid),
            None => SignalRefusal::Unsupported,
        };
        if signal == Signal::Stop {
            for stopped in &pids[..index] {
                if send(*stopped, Signal::Continue) != Some(true) {
                    log_warn!("pid {stopped} could not be continued after a refused suspend");
                }
            }
        }
        return Err(refusal);
    }
    Ok(())
}

/// Runs an argv hook. `Ok(None)` means no hook is configured.
fn run_hook(effect: &'static str, argv: &[String]) -> EffectResult<Option<String>> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(None);
    };

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| EffectError::failed(effect, format!("{program}: {err}")))?;

    if !output.status.success() {
        return Err(EffectError::failed(
            effect,
            format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_hooks_only_track_state() {
        let hooks = DesktopHooks {
            foreground_probe: Vec::new(),
            ..DesktopHooks::default()
        };
        let mut platform = DesktopPlatform::new(hooks, false);

        platform.set_notification_filter(NotificationFilter::None).unwrap();
        platform.set_ringer_silent(true).unwrap();

        assert_eq!(platform.notification_filter(), NotificationFilter::None);
        assert!(platform.ringer_silent());
    }

    #[test]
    fn missing_probe_is_unsupported() {
        let hooks = DesktopHooks {
            foreground_probe: Vec::new(),
            ..DesktopHooks::default()
        };
        let mut platform = DesktopPlatform::new(hooks, false);
        let now = Utc::now();

        assert!(matches!(
            platform.query_foreground_usage(now, now),
            Err(EffectError::Unsupported { .. })
        ));
    }

    #[test]
    fn suspension_refused_without_authority() {
        let mut platform = DesktopPlatform::new(DesktopHooks::default(), false);

        let err = platform
            .set_app_suspended(&"definitely-not-running".into(), true)
            .unwrap_err();

        assert!(matches!(err, EffectError::AuthorityMissing { effect: "suspend" }));
    }

    #[test]
    fn refused_stop_continues_the_pids_already_stopped() {
        let pids = [Pid::from_u32(101), Pid::from_u32(102), Pid::from_u32(103)];
        let mut sent = Vec::new();

        let outcome = signal_each(&pids, Signal::Stop, |pid, signal| {
            sent.push((pid.as_u32(), signal));
            Some(pid.as_u32() != 102)
        });

        assert_eq!(outcome, Err(SignalRefusal::Denied(Pid::from_u32(102))));
        assert_eq!(
            sent,
            vec![(101, Signal::Stop), (102, Signal::Stop), (101, Signal::Continue)]
        );
    }

    #[test]
    fn refused_continue_does_not_stop_anything() {
        let pids = [Pid::from_u32(201), Pid::from_u32(202)];
        let mut sent = Vec::new();

        let outcome = signal_each(&pids, Signal::Continue, |pid, signal| {
            sent.push((pid.as_u32(), signal));
            None
        });

        assert_eq!(outcome, Err(SignalRefusal::Unsupported));
        assert_eq!(sent, vec![(201, Signal::Continue)]);
    }

    #[test]
    fn terminating_an_absent_app_is_a_no_op() {
        let mut platform = DesktopPlatform::new(DesktopHooks::default(), false);

        platform
            .terminate_background_processes(&"bray-test-no-such-process".into())
            .unwrap();
    }

    #[test]
    fn failing_hook_reports_failure() {
        let argv = vec!["bray-test-no-such-binary".to_string()];

        assert!(matches!(
            run_hook("ringer", &argv),
            Err(EffectError::Failed { effect: "ringer", .. })
        ));
    }
}
