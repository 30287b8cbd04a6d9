//! Group → live subscriber sets.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use rtchat_core::{ChatError, ChatEvent, ConnectionId, DeliveryFailure, GroupId};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::metrics::DELIVERY_FAILURES_TOTAL;

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose inbox was full; the event was dropped for them only.
    pub dropped: usize,
    /// Closed subscribers removed from the group during this fan-out.
    pub reaped: usize,
}

/// Owns every group's subscriber set.
///
/// Fan-out runs while holding the group's shard read guard, so an
/// `unsubscribe` for that group waits until the fan-out in progress has
/// finished. Once `unsubscribe` returns, no later fan-out can reach the
/// removed connection.
#[derive(Default)]
pub struct GroupRegistry {
    groups: DashMap<GroupId, HashMap<ConnectionId, Arc<Connection>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `group`. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, group: &GroupId, connection: Arc<Connection>) -> bool {
        let mut subscribers = self.groups.entry(group.clone()).or_default();
        if subscribers.contains_key(&connection.id) {
            return false;
        }
        let _ = subscribers.insert(connection.id.clone(), connection);
        true
    }

    /// Remove a connection from `group`. Unknown groups and connections are ignored.
    pub fn unsubscribe(&self, group: &GroupId, connection: &ConnectionId) -> bool {
        let removed = match self.groups.get_mut(group) {
            Some(mut subscribers) => subscribers.remove(connection).is_some(),
            None => false,
        };
        if removed {
            let _ = self.groups.remove_if(group, |_, subscribers| subscribers.is_empty());
        }
        removed
    }

    /// Snapshot of the group's subscribers at call time.
    pub fn members(&self, group: &GroupId) -> Vec<Arc<Connection>> {
        self.groups
            .get(group)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, group: &GroupId) -> usize {
        self.groups.get(group).map_or(0, |subscribers| subscribers.len())
    }

    /// Groups with at least one subscriber.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Subscribers across every group.
    pub fn connection_count(&self) -> usize {
        self.groups.iter().map(|entry| entry.value().len()).sum()
    }

    /// Deliver `event` to every current subscriber of `group`.
    ///
    /// Failures never propagate: full inboxes lose this event, closed
    /// subscribers are unsubscribed once the fan-out has finished.
    pub fn fan_out(&self, group: &GroupId, event: &ChatEvent) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        if let Some(subscribers) = self.groups.get(group) {
            for connection in subscribers.values() {
                match connection.deliver(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(ChatError::DeliveryFailure { connection: id, reason }) => {
                        counter!(DELIVERY_FAILURES_TOTAL, "reason" => reason.to_string())
                            .increment(1);
                        warn!(
                            group_id = %group,
                            connection_id = %id,
                            event_type = event.event_type(),
                            %reason,
                            "delivery failed"
                        );
                        match reason {
                            DeliveryFailure::Closed => closed.push(connection.id.clone()),
                            DeliveryFailure::Lagging => report.dropped += 1,
                        }
                    }
                    Err(e) => warn!(group_id = %group, error = %e, "unexpected delivery error"),
                }
            }
        }

        for id in closed {
            if self.unsubscribe(group, &id) {
                report.reaped += 1;
                debug!(group_id = %group, connection_id = %id, "reaped closed subscriber");
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtchat_core::{MessageId, UserId};
    use tokio::sync::mpsc;

    fn connection(
        user: &str,
        group: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(UserId::from(user), GroupId::from(group), tx));
        (conn, rx)
    }

    fn event(id: i64) -> ChatEvent {
        ChatEvent::MessageCreated {
            group_id: GroupId::from("lobby"),
            message_id: MessageId::new(id),
        }
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = GroupRegistry::new();
        let lobby = GroupId::from("lobby");
        let (conn, _rx) = connection("alice", "lobby", 8);

        assert!(registry.subscribe(&lobby, conn.clone()));
        assert!(!registry.subscribe(&lobby, conn));
        assert_eq!(registry.subscriber_count(&lobby), 1);
    }

    #[test]
    fn unsubscribe_unknown_is_ignored() {
        let registry = GroupRegistry::new();
        let (conn, _rx) = connection("alice", "lobby", 8);
        assert!(!registry.unsubscribe(&GroupId::from("nowhere"), &conn.id));

        let lobby = GroupId::from("lobby");
        let _ = registry.subscribe(&lobby, conn.clone());
        assert!(!registry.unsubscribe(&lobby, &ConnectionId::from_raw("conn_other")));
        assert_eq!(registry.subscriber_count(&lobby), 1);
    }

    #[test]
    fn empty_groups_are_dropped() {
        let registry = GroupRegistry::new();
        let lobby = GroupId::from("lobby");
        let (conn, _rx) = connection("alice", "lobby", 8);

        let _ = registry.subscribe(&lobby, conn.clone());
        assert_eq!(registry.group_count(), 1);
        assert!(registry.unsubscribe(&lobby, &conn.id));
        assert_eq!(registry.group_count(), 0);
        assert!(registry.members(&lobby).is_empty());
    }

    #[test]
    fn fan_out_reaches_only_the_target_group() {
        let registry = GroupRegistry::new();
        let (a, mut rx_a) = connection("alice", "lobby", 8);
        let (b, mut rx_b) = connection("bob", "lobby", 8);
        let (c, mut rx_c) = connection("carol", "other", 8);
        let _ = registry.subscribe(&GroupId::from("lobby"), a);
        let _ = registry.subscribe(&GroupId::from("lobby"), b);
        let _ = registry.subscribe(&GroupId::from("other"), c);

        let report = registry.fan_out(&GroupId::from("lobby"), &event(1));
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap(), event(1));
        assert_eq!(rx_b.try_recv().unwrap(), event(1));
        assert!(rx_c.try_recv().is_err());
        assert_eq!(registry.connection_count(), 3);
    }

    #[test]
    fn closed_subscriber_is_reaped_without_affecting_others() {
        let registry = GroupRegistry::new();
        let lobby = GroupId::from("lobby");
        let (a, mut rx_a) = connection("alice", "lobby", 8);
        let (b, rx_b) = connection("bob", "lobby", 8);
        let _ = registry.subscribe(&lobby, a);
        let _ = registry.subscribe(&lobby, b);
        drop(rx_b);

        let report = registry.fan_out(&lobby, &event(1));
        assert_eq!(
            report,
            PublishReport { delivered: 1, dropped: 0, reaped: 1 }
        );
        assert_eq!(rx_a.try_recv().unwrap(), event(1));
        assert_eq!(registry.subscriber_count(&lobby), 1);
    }

    #[test]
    fn lagging_subscriber_loses_event_but_stays() {
        let registry = GroupRegistry::new();
        let lobby = GroupId::from("lobby");
        let (a, mut rx_a) = connection("alice", "lobby", 1);
        let _ = registry.subscribe(&lobby, a);

        assert_eq!(registry.fan_out(&lobby, &event(1)).delivered, 1);
        let report = registry.fan_out(&lobby, &event(2));
        assert_eq!(report.dropped, 1);
        assert_eq!(registry.subscriber_count(&lobby), 1);
        assert_eq!(rx_a.try_recv().unwrap(), event(1));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn publish_after_unsubscribe_is_not_delivered() {
        let registry = GroupRegistry::new();
        let lobby = GroupId::from("lobby");
        let (a, mut rx_a) = connection("alice", "lobby", 8);
        let _ = registry.subscribe(&lobby, a.clone());
        let _ = registry.unsubscribe(&lobby, &a.id);

        assert_eq!(registry.fan_out(&lobby, &event(1)), PublishReport::default());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_racing_fan_out_cuts_delivery_off() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let lobby = GroupId::from("lobby");
        for _ in 0..100 {
            let registry = Arc::new(GroupRegistry::new());
            let (a, mut rx_a) = connection("alice", "lobby", 4096);
            let _ = registry.subscribe(&lobby, a.clone());

            let started = Arc::new(AtomicBool::new(false));
            let stop = Arc::new(AtomicBool::new(false));
            let publisher = {
                let registry = registry.clone();
                let lobby = lobby.clone();
                let started = started.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut id = 0;
                    while !stop.load(Ordering::Acquire) && id < 2000 {
                        id += 1;
                        let _ = registry.fan_out(&lobby, &event(id));
                        started.store(true, Ordering::Release);
                    }
                })
            };
            while !started.load(Ordering::Acquire) {
                std::thread::yield_now();
            }

            assert!(registry.unsubscribe(&lobby, &a.id));
            let mut seen = Vec::new();
            while let Ok(ev) = rx_a.try_recv() {
                seen.push(ev);
            }
            stop.store(true, Ordering::Release);
            publisher.join().unwrap();

            assert!(rx_a.try_recv().is_err(), "delivered after unsubscribe returned");
            // Every event received arrived once, in publish order, without gaps.
            let expected: Vec<_> = (1..=seen.len() as i64).map(event).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn fan_out_preserves_publish_order() {
        let registry = GroupRegistry::new();
        let lobby = GroupId::from("lobby");
        let (a, mut rx_a) = connection("alice", "lobby", 64);
        let _ = registry.subscribe(&lobby, a);

        for id in 1..=20 {
            let _ = registry.fan_out(&lobby, &event(id));
        }
        for id in 1..=20 {
            assert_eq!(rx_a.try_recv().unwrap(), event(id));
        }
    }

    #[test]
    fn concurrent_subscribe_and_unsubscribe() {
        let registry = Arc::new(GroupRegistry::new());
        let lobby = GroupId::from("lobby");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let lobby = lobby.clone();
                std::thread::spawn(move || {
                    let mut keep = Vec::new();
                    for j in 0..50 {
                        let (conn, rx) = connection(&format!("u{i}"), "lobby", 1);
                        let _ = registry.subscribe(&lobby, conn.clone());
                        if j % 2 == 0 {
                            let _ = registry.unsubscribe(&lobby, &conn.id);
                        } else {
                            keep.push(rx);
                        }
                    }
                    keep
                })
            })
            .collect();
        let receivers: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.subscriber_count(&lobby), 8 * 25);
        assert_eq!(receivers.len(), 8 * 25);
    }
}
