use crate::errors::ChatError;
use crate::ids::{GroupId, MessageId, UserId};
use crate::models::{Group, Message};

/// Durable storage for groups, messages and online-member sets.
///
/// Calls are synchronous; implementations are expected to be cheap enough
/// to call from async handlers (the SQLite store holds a single mutexed
/// connection).
pub trait MessageStore: Send + Sync {
    fn get_group(&self, group: &GroupId) -> Result<Group, ChatError>;

    fn create_message(
        &self,
        group: &GroupId,
        author: &UserId,
        body: &str,
    ) -> Result<Message, ChatError>;

    fn get_message(&self, id: MessageId) -> Result<Message, ChatError>;

    /// Add `user` to the group's online set. Returns whether the set changed.
    fn add_online_member(&self, group: &GroupId, user: &UserId) -> Result<bool, ChatError>;

    /// Remove `user` from the group's online set. Returns whether the set changed.
    fn remove_online_member(&self, group: &GroupId, user: &UserId) -> Result<bool, ChatError>;

    fn online_member_count(&self, group: &GroupId) -> Result<u32, ChatError>;

    /// Newest `limit` messages of the group, newest first.
    fn recent_messages(&self, group: &GroupId, limit: u32) -> Result<Vec<Message>, ChatError>;
}
