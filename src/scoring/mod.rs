pub mod store;
pub mod updater;

pub use store::ScoreStore;
pub use updater::{ScoreUpdater, UpdateOutcome};
