//! Pub/sub fan-out seam.

use std::sync::Arc;

use async_trait::async_trait;
use rtchat_core::{ChatEvent, GroupId};
use tracing::trace;

use crate::registry::{GroupRegistry, PublishReport};

/// Delivers a published event to every connection subscribed to the group
/// at publish time.
///
/// Publishing never fails: per-subscriber problems are logged and
/// reflected in the report only. Two publishes to the same group from one
/// serialized caller are delivered in call order.
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    async fn publish(&self, group: &GroupId, event: ChatEvent) -> PublishReport;
}

/// In-process bus over a [`GroupRegistry`].
pub struct LocalBus {
    registry: Arc<GroupRegistry>,
}

impl LocalBus {
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BroadcastBus for LocalBus {
    async fn publish(&self, group: &GroupId, event: ChatEvent) -> PublishReport {
        debug_assert_eq!(event.group_id(), group, "event published to another group");
        let report = self.registry.fan_out(group, &event);
        trace!(
            group_id = %group,
            event_type = event.event_type(),
            delivered = report.delivered,
            dropped = report.dropped,
            reaped = report.reaped,
            "published"
        );
        report
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use rtchat_core::{MessageId, UserId};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn local_bus_delivers_through_registry() {
        let registry = Arc::new(GroupRegistry::new());
        let bus = LocalBus::new(registry.clone());
        let lobby = GroupId::from("lobby");
        let (tx, mut rx) = mpsc::channel(4);
        let _ = registry.subscribe(
            &lobby,
            Arc::new(Connection::new(UserId::from("alice"), lobby.clone(), tx)),
        );

        let event = ChatEvent::MessageCreated {
            group_id: lobby.clone(),
            message_id: MessageId::new(7),
        };
        let report = bus.publish(&lobby, event.clone()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_to_empty_group_is_a_no_op() {
        let bus = LocalBus::new(Arc::new(GroupRegistry::new()));
        let report = bus
            .publish(
                &GroupId::from("empty"),
                ChatEvent::OnlineCount {
                    group_id: GroupId::from("empty"),
                    online_count: 0,
                },
            )
            .await;
        assert_eq!(report, PublishReport::default());
    }
}
