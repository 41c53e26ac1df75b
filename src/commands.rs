//! Line-oriented control surface. Each line on stdin is one command; the
//! reply goes back to stdout.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};

use crate::models::AppIdentity;
use crate::policy::PolicySet;
use crate::presentation::{InterventionChoice, Presenter, StatusReport};
use crate::AppState;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const HELP: &str = "\
commands:
  FOCUS [minutes]     enter focus mode (FOCUS_MODE works too)
  UNFOCUS             leave focus mode
  TOGGLE              flip focus mode
  KILL                kill every watched app now
  STATUS              show scores and focus state
  COMPLY <app>        answer a pending intervention: kill the app
  DEFER <app>         answer a pending intervention: 5 more minutes
  FOREGROUND <app>    simulate only: put <app> in front
  BACKGROUND          simulate only: nothing in front
  RELOAD              re-read settings and policy
  QUIT                stop the watchdog and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Focus(Option<u64>),
    Unfocus,
    Toggle,
    KillAll,
    Status,
    Answer(AppIdentity, InterventionChoice),
    Foreground(AppIdentity),
    Background,
    Reload,
    Help,
    Quit,
}

impl FromStr for ControlCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_uppercase();
        let arg = parts.next();
        if let Some(extra) = parts.next() {
            bail!("unexpected argument {extra:?} for {verb}");
        }

        let app_arg = |verb: &str| -> Result<AppIdentity> {
            arg.map(AppIdentity::from)
                .ok_or_else(|| anyhow!("{verb} needs an app, e.g. {verb} com.instagram.android"))
        };

        let command = match verb.as_str() {
            "FOCUS" | "FOCUS_MODE" => {
                let minutes = arg
                    .map(|raw| {
                        raw.parse::<u64>()
                            .with_context(|| format!("invalid minutes {raw:?}"))
                    })
                    .transpose()?;
                if minutes == Some(0) {
                    bail!("focus needs at least one minute");
                }
                ControlCommand::Focus(minutes)
            }
            "COMPLY" | "KILL_APP" => ControlCommand::Answer(app_arg("COMPLY")?, InterventionChoice::Comply),
            "DEFER" => ControlCommand::Answer(app_arg("DEFER")?, InterventionChoice::Defer),
            "FOREGROUND" => ControlCommand::Foreground(app_arg("FOREGROUND")?),
            other => {
                if arg.is_some() {
                    bail!("{other} takes no argument");
                }
                match other {
                    "UNFOCUS" => ControlCommand::Unfocus,
                    "TOGGLE" => ControlCommand::Toggle,
                    "KILL" => ControlCommand::KillAll,
                    "STATUS" => ControlCommand::Status,
                    "BACKGROUND" => ControlCommand::Background,
                    "RELOAD" => ControlCommand::Reload,
                    "HELP" => ControlCommand::Help,
                    "QUIT" | "EXIT" => ControlCommand::Quit,
                    _ => bail!("unknown command {other}; try HELP"),
                }
            }
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Message(String),
    Quit,
}

pub async fn handle_command(state: &AppState, command: ControlCommand) -> Result<CommandReply> {
    let message = match command {
        ControlCommand::Focus(minutes) => {
            let minutes = minutes.unwrap_or_else(|| state.settings.current().focus_default_minutes);
            let snapshot = state.focus.enable_focus(minutes).await;
            match snapshot.state.expires_at {
                Some(expires_at) => format!(
                    "focus on until {}",
                    expires_at.with_timezone(&chrono::Local).format("%H:%M")
                ),
                None => "focus on".to_string(),
            }
        }
        ControlCommand::Unfocus => {
            if state.focus.disable_focus().await {
                "focus off".to_string()
            } else {
                "focus was not on".to_string()
            }
        }
        ControlCommand::Toggle => {
            let snapshot = state
                .focus
                .toggle_focus(state.settings.current().focus_default_minutes)
                .await;
            if snapshot.state.is_active() {
                "focus on".to_string()
            } else {
                "focus off".to_string()
            }
        }
        ControlCommand::KillAll => {
            let report = state.intervention.kill_all().await;
            format!(
                "killed {} apps ({} refused)",
                report.terminated, report.refused
            )
        }
        ControlCommand::Status => {
            let status = StatusReport::new(
                state.scores.scores_or_default().await,
                state.focus.expires_at().await,
            );
            state.console.render_status(&status);
            let shamed = state.scores.shame_events();
            let mut reply = format!("shame log: {} apps", shamed.len());
            if !shamed.is_empty() {
                let names: Vec<&str> = shamed.iter().map(|event| event.app.as_str()).collect();
                reply.push_str(&format!(" ({})", names.join(", ")));
            }
            let pending = state.console.pending_apps();
            if !pending.is_empty() {
                let names: Vec<&str> = pending.iter().map(AppIdentity::as_str).collect();
                reply.push_str(&format!("; waiting on {}", names.join(", ")));
            }
            reply
        }
        ControlCommand::Answer(app, choice) => {
            if !state.console.answer(&app, choice) {
                bail!("no intervention pending for {app}");
            }
            match choice {
                InterventionChoice::Comply => format!("killing {app}"),
                InterventionChoice::Defer => format!("5 more minutes on {app}; noted"),
            }
        }
        ControlCommand::Foreground(app) => {
            let simulator = simulator(state)?;
            simulator.bring_to_front(app.clone());
            format!("{app} is now in front")
        }
        ControlCommand::Background => {
            simulator(state)?.clear_usage();
            "nothing in front".to_string()
        }
        ControlCommand::Reload => {
            let settings = state.settings.reload()?;
            let policy = PolicySet::from_entries(settings.policy.clone());
            if policy.is_empty() {
                log_warn!("reloaded policy is empty; no app will be challenged");
            }
            let watched = policy.len();
            state.policy.replace(policy);
            if let Some(simulator) = &state.simulator {
                simulator.grant_authority(settings.elevated_authority);
            }
            state.watchdog.lock().await.restart(&settings).await?;
            log_info!("settings reloaded from {}", state.settings.path().display());
            format!("reloaded; watching {watched} apps")
        }
        ControlCommand::Help => HELP.to_string(),
        ControlCommand::Quit => return Ok(CommandReply::Quit),
    };
    Ok(CommandReply::Message(message))
}

fn simulator(state: &AppState) -> Result<&crate::platform::MemoryPlatform> {
    state
        .simulator
        .as_ref()
        .ok_or_else(|| anyhow!("only available when the platform is \"simulate\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ControlCommand {
        line.parse().unwrap()
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(parse("focus"), ControlCommand::Focus(None));
        assert_eq!(parse("FOCUS_MODE 25"), ControlCommand::Focus(Some(25)));
        assert_eq!(parse("  Toggle "), ControlCommand::Toggle);
        assert_eq!(parse("kill"), ControlCommand::KillAll);
        assert_eq!(parse("exit"), ControlCommand::Quit);
    }

    #[test]
    fn answers_carry_the_app_verbatim() {
        assert_eq!(
            parse("comply com.Instagram.android"),
            ControlCommand::Answer("com.Instagram.android".into(), InterventionChoice::Comply)
        );
        assert_eq!(
            parse("KILL_APP com.discord"),
            ControlCommand::Answer("com.discord".into(), InterventionChoice::Comply)
        );
        assert_eq!(
            parse("DEFER com.discord"),
            ControlCommand::Answer("com.discord".into(), InterventionChoice::Defer)
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        for line in ["", "FOCUS soon", "FOCUS 0", "COMPLY", "STATUS now", "DEFER a b", "DANCE"] {
            assert!(line.parse::<ControlCommand>().is_err(), "{line:?} should not parse");
        }
    }
}
