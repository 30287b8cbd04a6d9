//! # rtchat-server
//!
//! The group membership and broadcast core, and the axum transport that
//! exposes it.
//!
//! - [`registry::GroupRegistry`]: live subscriber sets per group
//! - [`bus::BroadcastBus`]: publish-to-group seam, [`bus::LocalBus`] in process
//! - [`presence::PresenceTracker`]: online sets and the others-online count
//! - [`lanes::GroupLanes`]: one writer at a time per group
//! - [`session::ConnectionSession`]: per-connection state machine runtime
//! - [`hub::ChatHub`]: wires the above to a store, renderer and access policy

pub mod bus;
pub mod connection;
pub mod hub;
pub mod identity;
pub mod lanes;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod render;
pub mod server;
pub mod session;
pub mod socket;

pub use bus::{BroadcastBus, LocalBus};
pub use hub::{ChatHub, HubConfig};
pub use identity::{HeaderIdentity, IdentityResolver};
pub use registry::{GroupRegistry, PublishReport};
pub use render::JsonRenderer;
pub use server::{build_router, start, start_with_state, AppState, ServerConfig, ServerHandle};
pub use session::{ConnectionSession, SessionState};
