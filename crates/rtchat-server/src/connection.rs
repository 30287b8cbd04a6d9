//! Live subscriber handle for one client connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rtchat_core::{ChatError, ChatEvent, ConnectionId, DeliveryFailure, GroupId, UserId};
use tokio::sync::mpsc;

/// One open connection, bound to a single (user, group) pair for its lifetime.
///
/// Publishers never wait on a connection: events are pushed into a bounded
/// inbox with `try_send`, and the owning session drains it.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub group_id: GroupId,
    tx: mpsc::Sender<ChatEvent>,
    open: AtomicBool,
    pub connected_at: Instant,
    dropped: AtomicU64,
}

impl Connection {
    pub fn new(user_id: UserId, group_id: GroupId, tx: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            group_id,
            tx,
            open: AtomicBool::new(true),
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event into the inbox without waiting.
    ///
    /// `Closed` means the session is gone and the connection should be
    /// reaped; `Lagging` means the inbox is full and only this event is lost.
    pub fn deliver(&self, event: ChatEvent) -> Result<(), ChatError> {
        if !self.is_open() {
            return Err(self.failure(DeliveryFailure::Closed));
        }
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(self.failure(DeliveryFailure::Lagging))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(self.failure(DeliveryFailure::Closed))
            }
        }
    }

    /// Stop accepting deliveries. Idempotent.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Events dropped because the inbox was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    fn failure(&self, reason: DeliveryFailure) -> ChatError {
        ChatError::DeliveryFailure {
            connection: self.id.to_string(),
            reason,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("group_id", &self.group_id)
            .field("open", &self.is_open())
            .finish()
    }
}
