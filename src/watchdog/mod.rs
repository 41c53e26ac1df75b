//! The periodic sample → intervene → score → repaint cycle.

mod controller;
mod loop_worker;
mod sampler;

pub use controller::{WatchdogController, WatchdogDeps};
pub use loop_worker::{run_tick, TickContext, TickReport};
pub use sampler::{most_recent, ForegroundSampler};
