use std::collections::BTreeMap;
use std::path::PathBuf;

use rtchat_core::PresenceMode;
use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

/// HTTP / WebSocket listener.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    /// `0` asks the OS for a free port.
    pub port: u16,
    /// Seconds between server-initiated Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Rendered payloads buffered per client before the session waits on the socket.
    pub outbound_queue: usize,
    /// Request header carrying the authenticated user identity.
    pub identity_header: String,
    /// Install a Prometheus recorder and serve `/metrics`.
    pub metrics: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            heartbeat_interval_secs: 30,
            outbound_queue: 256,
            identity_header: "x-user-id".into(),
            metrics: true,
        }
    }
}

/// Group membership and fan-out core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub presence_mode: PresenceMode,
    /// Events buffered per connection before deliveries to it are dropped.
    pub inbox_capacity: usize,
    /// Size of the message history window.
    pub history_limit: u32,
    /// Public groups created at startup if missing.
    pub default_groups: Vec<String>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            presence_mode: PresenceMode::PerUser,
            inbox_capacity: 256,
            history_limit: 30,
            default_groups: vec!["public-chat".into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: crate::loader::rtchat_dir().join("rtchat.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module level overrides, e.g. `{"rtchat_server": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
