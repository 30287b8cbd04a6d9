use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("invalid filter directive: {0}")]
    InvalidFilter(String),

    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "rtchat_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from string levels as they appear in settings files.
    pub fn from_strings(
        level: &str,
        modules: &[(String, String)],
        json: bool,
    ) -> Result<Self, TelemetryError> {
        let parse = |s: &str| {
            Level::from_str(s).map_err(|_| TelemetryError::InvalidLevel(s.to_string()))
        };
        let module_levels = modules
            .iter()
            .map(|(module, lvl)| Ok((module.clone(), parse(lvl)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;
        Ok(Self {
            log_level: parse(level)?,
            module_levels,
            json,
        })
    }

    /// Filter directive string, e.g. `info,rtchat_server=debug`.
    pub fn directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directives())
            .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?,
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(TelemetryConfig::default().directives(), "info");
    }

    #[test]
    fn module_overrides_are_appended() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("rtchat_server".into(), Level::DEBUG),
                ("rtchat_store".into(), Level::TRACE),
            ],
            json: true,
        };
        assert_eq!(
            config.directives(),
            "warn,rtchat_server=debug,rtchat_store=trace"
        );
    }

    #[test]
    fn from_strings_parses_levels() {
        let config = TelemetryConfig::from_strings(
            "debug",
            &[("rtchat_server".into(), "trace".into())],
            false,
        )
        .unwrap();
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.module_levels[0].1, Level::TRACE);
    }

    #[test]
    fn from_strings_rejects_unknown_level() {
        let err = TelemetryConfig::from_strings("loud", &[], false).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidLevel(l) if l == "loud"));
    }
}
