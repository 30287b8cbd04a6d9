//! Domain types shared by every rtchat crate: identifiers, groups and
//! messages, the events fanned out to group members, the error taxonomy,
//! and the traits behind which the external collaborators live.

pub mod access;
pub mod errors;
pub mod events;
pub mod ids;
pub mod models;
pub mod render;
pub mod store;

pub use access::{AccessPolicy, MembershipPolicy};
pub use errors::{ChatError, DeliveryFailure};
pub use events::ChatEvent;
pub use ids::{ConnectionId, GroupId, MessageId, UserId};
pub use models::{Group, Message, PresenceMode};
pub use render::Renderer;
pub use store::MessageStore;
