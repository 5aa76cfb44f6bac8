pub mod config;
pub mod duration;

pub use config::{BackendMode, ControllerConfig, Settings};
pub use duration::parse_duration;
