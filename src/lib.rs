mod utils;

pub mod commands;
pub mod db;
pub mod effects;
pub mod error;
pub mod focus;
pub mod intervention;
pub mod models;
pub mod platform;
pub mod policy;
pub mod presentation;
pub mod scoring;
pub mod settings;
pub mod watchdog;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};

use commands::{handle_command, CommandReply, ControlCommand};
use db::Database;
use effects::EffectDispatcher;
use focus::FocusModeController;
use intervention::InterventionController;
use models::ScoreState;
use platform::{DesktopPlatform, MemoryPlatform, Platform};
use policy::{PolicyHandle, PolicySet};
use presentation::ConsolePresenter;
use scoring::{ScoreStore, ScoreUpdater};
use settings::{PlatformKind, SettingsStore};
use watchdog::{WatchdogController, WatchdogDeps};

pub struct AppState {
    pub settings: SettingsStore,
    pub db: Database,
    pub policy: PolicyHandle,
    pub scores: ScoreStore,
    pub intervention: InterventionController,
    pub focus: FocusModeController,
    pub watchdog: Mutex<WatchdogController>,
    pub console: Arc<ConsolePresenter>,
    /// Set when running against the in-process platform; drives `FOREGROUND`.
    pub simulator: Option<MemoryPlatform>,
}

impl AppState {
    /// Wires everything up for the platform named in the settings.
    pub fn new(settings: SettingsStore, db: Database) -> Result<Self> {
        let current = settings.current();
        match current.platform {
            PlatformKind::Desktop => {
                let platform = DesktopPlatform::new(current.desktop.clone(), current.elevated_authority);
                Self::with_platform(settings, db, platform, None)
            }
            PlatformKind::Simulate => {
                let platform = MemoryPlatform::with_authority(current.elevated_authority);
                Self::with_platform(settings, db, platform.clone(), Some(platform))
            }
        }
    }

    pub fn with_platform<P>(
        settings: SettingsStore,
        db: Database,
        platform: P,
        simulator: Option<MemoryPlatform>,
    ) -> Result<Self>
    where
        P: Platform + 'static,
    {
        let current = settings.current();
        let effects = EffectDispatcher::spawn(platform)?;
        let policy = PolicyHandle::new(PolicySet::from_entries(current.policy.clone()));
        let scores = ScoreStore::new(
            db.clone(),
            ScoreState::clamped(current.initial_revenue, current.initial_cognitive_load),
        );
        let console = Arc::new(ConsolePresenter::new());
        let intervention = InterventionController::new(
            policy.clone(),
            console.clone(),
            effects.clone(),
            scores.clone(),
        );
        let focus = FocusModeController::new(effects.clone(), policy.clone(), db.clone());
        let watchdog = WatchdogController::new(WatchdogDeps {
            effects,
            intervention: intervention.clone(),
            scores: scores.clone(),
            updater: ScoreUpdater::new(scores.clone(), current.score_update_interval()),
            focus: focus.clone(),
            presenter: console.clone(),
        });

        Ok(Self {
            settings,
            db,
            policy,
            scores,
            intervention,
            focus,
            watchdog: Mutex::new(watchdog),
            console,
            simulator,
        })
    }

    /// Finishes any focus session left by a previous run, then starts the
    /// watchdog.
    pub async fn boot(&self) -> Result<()> {
        let current = self.settings.current();
        let snapshot = self.focus.resume(current.focus_resume_grace()).await;
        if snapshot.state.is_active() {
            info!("focus mode carried over from last run");
        }
        self.watchdog.lock().await.start(&current)
    }

    /// Stops the watchdog. An active focus session stays persisted and its
    /// timer is picked up by the next `boot`.
    pub async fn shutdown(&self) -> Result<()> {
        self.watchdog.lock().await.stop().await
    }
}

/// `BRAY_DATA_DIR` when set, otherwise the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("BRAY_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("bray"))
        .ok_or_else(|| anyhow!("no data directory available; set BRAY_DATA_DIR"))
}

fn debug_enabled() -> bool {
    std::env::var("BRAY_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn run() -> Result<()> {
    utils::init_logging(debug_enabled());

    info!("bray starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve())
}

async fn serve() -> Result<()> {
    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let database = Database::new(data_dir.join("bray.sqlite3"))?;
    let state = AppState::new(settings, database)?;

    state.boot().await?;
    println!("bray is watching. Type HELP for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("control input closed; running until Ctrl-C");
                        tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
                        break;
                    }
                    Err(err) => {
                        error!("failed to read control input: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match line.parse::<ControlCommand>() {
                    Ok(command) => command,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match handle_command(&state, command).await {
                    Ok(CommandReply::Message(message)) => println!("{message}"),
                    Ok(CommandReply::Quit) => break,
                    Err(err) => {
                        warn!("command failed: {err:#}");
                        println!("{err:#}");
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Ctrl-C received");
                break;
            }
        }
    }

    state.shutdown().await?;
    info!("bray stopped");
    Ok(())
}
