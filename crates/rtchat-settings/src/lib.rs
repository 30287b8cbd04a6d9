//! # rtchat-settings
//!
//! Layered configuration: compiled defaults, then an optional JSON file,
//! then `RTCHAT_`-prefixed environment variables.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::SettingsError;
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{ChatSettings, DatabaseSettings, HubSettings, LoggingSettings, ServerSettings};
