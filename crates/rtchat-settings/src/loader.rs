//! Settings loading.
//!
//! Loading flow:
//! 1. Start with compiled [`ChatSettings::default()`]
//! 2. If the settings file exists, merge its values over the defaults
//! 3. Merge `RTCHAT_`-prefixed environment variables (highest priority);
//!    `__` separates sections, e.g. `RTCHAT_SERVER__PORT=9000`

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use tracing::debug;

use crate::errors::Result;
use crate::types::ChatSettings;

pub const ENV_PREFIX: &str = "RTCHAT_";

/// `~/.rtchat`, or `/tmp/.rtchat` when `HOME` is unset.
pub fn rtchat_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".rtchat")
}

/// Resolve the path to the settings file (`~/.rtchat/settings.json`).
pub fn settings_path() -> PathBuf {
    rtchat_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatSettings> {
    let mut figment = Figment::from(Serialized::defaults(ChatSettings::default()));

    if path.exists() {
        debug!(?path, "loading settings from file");
        figment = figment.merge(Json::file(path));
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let settings = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(settings)
}
