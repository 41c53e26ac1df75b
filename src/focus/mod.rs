mod controller;
mod state;

pub use controller::{FocusModeController, FocusSnapshot, MAX_FOCUS_MINUTES};
pub use state::{FocusState, FocusStatus, PriorState};
