//! Wiring of the chat core.

use std::sync::Arc;

use metrics::counter;
use rtchat_core::{
    AccessPolicy, ChatError, ChatEvent, Group, GroupId, MembershipPolicy, Message, MessageStore,
    PresenceMode, Renderer, UserId,
};
use tracing::debug;

use crate::bus::{BroadcastBus, LocalBus};
use crate::lanes::GroupLanes;
use crate::metrics::MESSAGES_TOTAL;
use crate::presence::PresenceTracker;
use crate::registry::GroupRegistry;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub presence_mode: PresenceMode,
    /// Events buffered per connection before deliveries to it are dropped.
    pub inbox_capacity: usize,
    /// Upper bound on history requests.
    pub history_limit: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            presence_mode: PresenceMode::PerUser,
            inbox_capacity: 256,
            history_limit: 30,
        }
    }
}

/// Shared state behind every connection session: the store and render
/// hooks plus the registry, bus, presence tracker and per-group lanes.
pub struct ChatHub {
    store: Arc<dyn MessageStore>,
    renderer: Arc<dyn Renderer>,
    access: Arc<dyn AccessPolicy>,
    registry: Arc<GroupRegistry>,
    bus: Arc<dyn BroadcastBus>,
    lanes: Arc<GroupLanes>,
    presence: PresenceTracker,
    config: HubConfig,
}

impl ChatHub {
    /// In-process hub: local bus and membership-based access.
    pub fn new(
        store: Arc<dyn MessageStore>,
        renderer: Arc<dyn Renderer>,
        config: HubConfig,
    ) -> Self {
        let registry = Arc::new(GroupRegistry::new());
        let bus = Arc::new(LocalBus::new(registry.clone()));
        Self::with_parts(store, renderer, Arc::new(MembershipPolicy), registry, bus, config)
    }

    /// Hub over caller-supplied access policy and bus. `bus` must deliver
    /// to the connections subscribed in `registry`.
    pub fn with_parts(
        store: Arc<dyn MessageStore>,
        renderer: Arc<dyn Renderer>,
        access: Arc<dyn AccessPolicy>,
        registry: Arc<GroupRegistry>,
        bus: Arc<dyn BroadcastBus>,
        config: HubConfig,
    ) -> Self {
        let lanes = Arc::new(GroupLanes::new());
        let presence = PresenceTracker::new(
            store.clone(),
            bus.clone(),
            lanes.clone(),
            config.presence_mode,
        );
        Self {
            store,
            renderer,
            access,
            registry,
            bus,
            lanes,
            presence,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<dyn BroadcastBus> {
        &self.bus
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Whether `user` may join `group`: it must exist and the access
    /// policy must allow it. No side effects.
    pub fn admit(&self, user: &UserId, group: &GroupId) -> Result<Group, ChatError> {
        let group = self.store.get_group(group)?;
        self.access.authorize(&group, user)?;
        Ok(group)
    }

    /// Store `body` as a message by `author` and publish it to `group`.
    ///
    /// Persist and publish happen under the group's lane, so every
    /// subscriber sees messages in store order. Nothing is published if
    /// the store refuses the message. Callers are expected to have
    /// admitted `author` already.
    pub async fn post_message(
        &self,
        author: &UserId,
        group: &GroupId,
        body: &str,
    ) -> Result<Message, ChatError> {
        let _lane = self.lanes.acquire(group).await;
        let message = self.store.create_message(group, author, body)?;
        counter!(MESSAGES_TOTAL).increment(1);
        debug!(group_id = %group, message_id = %message.id, "message stored");
        let _ = self
            .bus
            .publish(
                group,
                ChatEvent::MessageCreated {
                    group_id: group.clone(),
                    message_id: message.id,
                },
            )
            .await;
        Ok(message)
    }

    /// Up to `limit` most recent messages, oldest first, after the same
    /// admission checks as a connection. `limit` is capped at the
    /// configured history window.
    pub fn history(
        &self,
        user: &UserId,
        group: &GroupId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ChatError> {
        let _ = self.admit(user, group)?;
        let limit = limit
            .unwrap_or(self.config.history_limit)
            .min(self.config.history_limit);
        let mut messages = self.store.recent_messages(group, limit)?;
        messages.reverse();
        debug!(group_id = %group, user_id = %user, count = messages.len(), "history");
        Ok(messages)
    }

    /// [`history`](Self::history), rendered for `user`.
    pub fn rendered_history(
        &self,
        user: &UserId,
        group: &GroupId,
        limit: Option<u32>,
    ) -> Result<Vec<String>, ChatError> {
        Ok(self
            .history(user, group, limit)?
            .iter()
            .map(|message| self.renderer.render_message(message, user))
            .collect())
    }
}
