use std::sync::Arc;

use dashmap::DashMap;
use rtchat_core::GroupId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per group.
///
/// Every write path that ends in a publish (persist-then-publish,
/// presence mutate-then-publish) runs while holding its group's lane, so
/// each group has at most one such sequence in flight and subscribers see
/// events in the order they were produced.
#[derive(Default)]
pub struct GroupLanes {
    lanes: DashMap<GroupId, Arc<Mutex<()>>>,
}

impl GroupLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `group`'s lane.
    pub async fn acquire(&self, group: &GroupId) -> OwnedMutexGuard<()> {
        // Clone out of the map before awaiting; no shard guard is held across the await.
        let lane = self.lanes.entry(group.clone()).or_default().clone();
        lane.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_group_is_exclusive() {
        let lanes = Arc::new(GroupLanes::new());
        let lobby = GroupId::from("lobby");
        let guard = lanes.acquire(&lobby).await;

        let waiter = {
            let lanes = lanes.clone();
            let lobby = lobby.clone();
            tokio::spawn(async move {
                let _guard = lanes.acquire(&lobby).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn groups_do_not_block_each_other() {
        let lanes = GroupLanes::new();
        let _lobby = lanes.acquire(&GroupId::from("lobby")).await;
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            lanes.acquire(&GroupId::from("other")),
        )
        .await;
        assert!(other.is_ok());
    }
}
