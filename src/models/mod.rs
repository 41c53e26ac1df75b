pub mod app;
pub mod focus;
pub mod score;

pub use app::{AppIdentity, UsageRecord};
pub use focus::FocusRecord;
pub use score::{ScoreState, ShameEvent, MAX_COGNITIVE_LOAD};
