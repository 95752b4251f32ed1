//! Configuration
//!
//! Process settings built at startup and the persisted project config.

pub mod project;
pub mod settings;

pub use project::{ProjectConfig, ServiceSettings, CONFIG_VERSION};
pub use settings::{is_truthy, ConflictPolicy, Settings};
