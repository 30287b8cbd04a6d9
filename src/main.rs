//! # rtchat
//!
//! Realtime group chat server binary: loads settings, opens the store and
//! serves the WebSocket endpoint. Also carries a few group administration
//! commands that work directly on the database.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rtchat_core::{GroupId, MessageStore, UserId};
use rtchat_server::{AppState, ChatHub, HubConfig, JsonRenderer, ServerConfig};
use rtchat_settings::ChatSettings;
use rtchat_store::{Database, SqliteMessageStore};
use rtchat_telemetry::TelemetryConfig;
use tracing::info;

/// Realtime group chat server.
#[derive(Parser, Debug)]
#[command(name = "rtchat", about = "Realtime group chat server")]
struct Cli {
    /// Settings file (defaults to ~/.rtchat/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default).
    Serve(ServeArgs),
    /// Manage chat groups.
    #[command(subcommand)]
    Group(GroupCommand),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create a group.
    Create {
        name: String,
        /// Restrict the group to its listed members.
        #[arg(long)]
        private: bool,
        /// Permitted member (repeatable).
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// Find or create the private group shared by exactly two users.
    Direct { user_a: String, user_b: String },
    /// Permit a user in a private group.
    AddMember { name: String, user: String },
    /// List all groups.
    List,
    /// Show one group, who is online in it and how many messages it holds.
    Show { name: String },
    /// Print the most recent messages of a group, oldest first.
    History {
        name: String,
        #[arg(long, default_value = "30")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "settings file not found: {}", path.display());
            rtchat_settings::load_settings_from_path(path)
        }
        None => rtchat_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let modules: Vec<(String, String)> = settings
        .logging
        .modules
        .iter()
        .map(|(module, level)| (module.clone(), level.clone()))
        .collect();
    let telemetry =
        TelemetryConfig::from_strings(&settings.logging.level, &modules, settings.logging.json)?;
    rtchat_telemetry::init_telemetry(&telemetry)?;

    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| settings.database.path.clone());
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let store = Arc::new(SqliteMessageStore::new(db));

    match cli.command {
        None => serve(settings, store, ServeArgs::default()).await,
        Some(Command::Serve(args)) => serve(settings, store, args).await,
        Some(Command::Group(cmd)) => group(&store, cmd),
    }
}

async fn serve(
    settings: ChatSettings,
    store: Arc<SqliteMessageStore>,
    args: ServeArgs,
) -> Result<()> {
    // No connection survives a restart.
    let cleared = store.reset_presence().context("failed to reset presence")?;
    if cleared > 0 {
        info!(cleared, "cleared stale online members");
    }
    for name in &settings.hub.default_groups {
        let _ = store
            .groups()
            .get_or_create(&GroupId::from(name.as_str()))
            .with_context(|| format!("failed to create group {name}"))?;
    }

    let hub_config = HubConfig {
        presence_mode: settings.hub.presence_mode,
        inbox_capacity: settings.hub.inbox_capacity,
        history_limit: settings.hub.history_limit,
    };
    let hub = Arc::new(ChatHub::new(store, Arc::new(JsonRenderer), hub_config));

    let server_config = ServerConfig {
        host: args.host.unwrap_or(settings.server.host),
        port: args.port.unwrap_or(settings.server.port),
        heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs),
        outbound_queue: settings.server.outbound_queue,
        identity_header: settings.server.identity_header,
    };
    let mut state = AppState::new(hub, server_config);
    if settings.server.metrics {
        let recorder =
            rtchat_server::metrics::install_recorder().context("failed to install metrics")?;
        state = state.with_metrics(recorder);
    }
    let handle = rtchat_server::start_with_state(state)
        .await
        .context("failed to start server")?;
    info!(
        addr = %handle.addr,
        presence_mode = ?settings.hub.presence_mode,
        "rtchat ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    info!("shutting down");
    handle.shutdown();
    Ok(())
}

fn group(store: &SqliteMessageStore, cmd: GroupCommand) -> Result<()> {
    let out = match cmd {
        GroupCommand::Create {
            name,
            private,
            members,
        } => {
            let members: Vec<UserId> = members.into_iter().map(UserId::from).collect();
            let group = store
                .groups()
                .create(&GroupId::from(name), private, &members)?;
            serde_json::to_value(group)?
        }
        GroupCommand::Direct { user_a, user_b } => {
            let group = store
                .groups()
                .get_or_create_private(&UserId::from(user_a), &UserId::from(user_b))?;
            serde_json::to_value(group)?
        }
        GroupCommand::AddMember { name, user } => {
            let id = GroupId::from(name);
            let added = store.groups().add_member(&id, &UserId::from(user))?;
            serde_json::json!({ "group": store.groups().get(&id)?, "added": added })
        }
        GroupCommand::List => serde_json::to_value(store.groups().list()?)?,
        GroupCommand::Show { name } => {
            let id = GroupId::from(name);
            let group = store.groups().get(&id)?;
            let online = store.online().members(&id)?;
            let messages = store.messages().count(&id)?;
            serde_json::json!({ "group": group, "online": online, "messages": messages })
        }
        GroupCommand::History { name, limit } => {
            let mut messages = store.recent_messages(&GroupId::from(name), limit)?;
            messages.reverse();
            serde_json::to_value(messages)?
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
