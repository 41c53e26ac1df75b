#[macro_use]
pub mod logging;

pub use logging::init_logging;
