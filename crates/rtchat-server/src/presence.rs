//! Online-member tracking.

use std::sync::Arc;

use dashmap::DashMap;
use rtchat_core::{ChatError, ChatEvent, GroupId, MessageStore, PresenceMode, UserId};
use tracing::{debug, instrument, warn};

use crate::bus::BroadcastBus;
use crate::connection::Connection;
use crate::lanes::GroupLanes;

/// Maintains each group's online set in the store and announces changes.
///
/// In [`PresenceMode::PerUser`] a user joins the online set with their first
/// connection to a group and leaves it with their last; open connections
/// are counted per (group, user). In [`PresenceMode::Legacy`] any single
/// disconnect removes the user.
///
/// The reported count is the store's cardinality minus one: it counts the
/// *other* users online, from the point of view of any one member. It is
/// not clamped, so a publish that follows the last user leaving carries -1.
pub struct PresenceTracker {
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn BroadcastBus>,
    lanes: Arc<GroupLanes>,
    mode: PresenceMode,
    open_connections: DashMap<(GroupId, UserId), usize>,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn BroadcastBus>,
        lanes: Arc<GroupLanes>,
        mode: PresenceMode,
    ) -> Self {
        Self {
            store,
            bus,
            lanes,
            mode,
            open_connections: DashMap::new(),
        }
    }

    /// Record an opened connection of `user` to `group`.
    ///
    /// Returns whether the online set changed; when it did, the new count
    /// has been published to the group.
    #[instrument(skip(self), fields(group_id = %group, user_id = %user))]
    pub async fn mark_online(&self, group: &GroupId, user: &UserId) -> Result<bool, ChatError> {
        let _lane = self.lanes.acquire(group).await;

        let changed = match self.mode {
            PresenceMode::Legacy => self.store.add_online_member(group, user)?,
            PresenceMode::PerUser => {
                let key = (group.clone(), user.clone());
                let first = {
                    let mut open = self.open_connections.entry(key.clone()).or_insert(0);
                    *open += 1;
                    *open == 1
                };
                if first {
                    match self.store.add_online_member(group, user) {
                        Ok(changed) => changed,
                        Err(e) => {
                            let _ = self.open_connections.remove(&key);
                            return Err(e);
                        }
                    }
                } else {
                    false
                }
            }
        };

        if changed {
            self.announce(group).await;
        }
        Ok(changed)
    }

    /// Record a closed connection of `user` to `group`. Idempotent.
    ///
    /// Returns whether the online set changed; when it did, the new count
    /// has been published to the group.
    #[instrument(skip(self), fields(group_id = %group, user_id = %user))]
    pub async fn mark_offline(&self, group: &GroupId, user: &UserId) -> Result<bool, ChatError> {
        let _lane = self.lanes.acquire(group).await;

        let changed = match self.mode {
            PresenceMode::Legacy => {
                let _ = self.open_connections.remove(&(group.clone(), user.clone()));
                self.store.remove_online_member(group, user)?
            }
            PresenceMode::PerUser => {
                let key = (group.clone(), user.clone());
                let last = match self.open_connections.get_mut(&key) {
                    Some(mut open) => {
                        *open = open.saturating_sub(1);
                        *open == 0
                    }
                    None => false,
                };
                if last {
                    let _ = self.open_connections.remove_if(&key, |_, open| *open == 0);
                    self.store.remove_online_member(group, user)?
                } else {
                    false
                }
            }
        };

        if changed {
            self.announce(group).await;
        }
        Ok(changed)
    }

    /// Others online: store cardinality minus one.
    pub fn online_count(&self, group: &GroupId) -> Result<i64, ChatError> {
        Ok(i64::from(self.store.online_member_count(group)?) - 1)
    }

    /// Deliver the current count to a single connection, ordered with the
    /// group's other presence announcements.
    pub async fn send_count_to(&self, connection: &Connection) -> Result<(), ChatError> {
        let _lane = self.lanes.acquire(&connection.group_id).await;
        let online_count = self.online_count(&connection.group_id)?;
        connection.deliver(ChatEvent::OnlineCount {
            group_id: connection.group_id.clone(),
            online_count,
        })
    }

    /// Open connections currently counted for `user` in `group`.
    pub fn open_connections(&self, group: &GroupId, user: &UserId) -> usize {
        self.open_connections
            .get(&(group.clone(), user.clone()))
            .map_or(0, |open| *open)
    }

    // Caller holds the group's lane. The set has already changed, so a
    // failed count read is logged rather than returned.
    async fn announce(&self, group: &GroupId) {
        let online_count = match self.online_count(group) {
            Ok(count) => count,
            Err(e) => {
                warn!(group_id = %group, error = %e, "online count unavailable, not announced");
                return;
            }
        };
        debug!(group_id = %group, online_count, "presence changed");
        let _ = self
            .bus
            .publish(
                group,
                ChatEvent::OnlineCount {
                    group_id: group.clone(),
                    online_count,
                },
            )
            .await;
    }
}
