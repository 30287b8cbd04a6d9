use rtchat_core::{ChatError, Group, GroupId, Message, MessageId, MessageStore, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::groups::GroupRepo;
use crate::messages::MessageRepo;
use crate::online::OnlineRepo;

/// `MessageStore` backed by one SQLite database.
pub struct SqliteMessageStore {
    groups: GroupRepo,
    messages: MessageRepo,
    online: OnlineRepo,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            groups: GroupRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            online: OnlineRepo::new(db),
        }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn groups(&self) -> &GroupRepo {
        &self.groups
    }

    pub fn messages(&self) -> &MessageRepo {
        &self.messages
    }

    pub fn online(&self) -> &OnlineRepo {
        &self.online
    }

    /// Drop presence left over from a previous process. No connection
    /// survives a restart, so every online set starts empty.
    pub fn reset_presence(&self) -> Result<usize, StoreError> {
        self.online.clear_all()
    }
}

impl MessageStore for SqliteMessageStore {
    fn get_group(&self, group: &GroupId) -> Result<Group, ChatError> {
        Ok(self.groups.get(group)?)
    }

    fn create_message(
        &self,
        group: &GroupId,
        author: &UserId,
        body: &str,
    ) -> Result<Message, ChatError> {
        Ok(self.messages.create(group, author, body)?)
    }

    fn get_message(&self, id: MessageId) -> Result<Message, ChatError> {
        Ok(self.messages.get(id)?)
    }

    fn add_online_member(&self, group: &GroupId, user: &UserId) -> Result<bool, ChatError> {
        Ok(self.online.add(group, user)?)
    }

    fn remove_online_member(&self, group: &GroupId, user: &UserId) -> Result<bool, ChatError> {
        Ok(self.online.remove(group, user)?)
    }

    fn online_member_count(&self, group: &GroupId) -> Result<u32, ChatError> {
        Ok(self.online.count(group)?)
    }

    fn recent_messages(&self, group: &GroupId, limit: u32) -> Result<Vec<Message>, ChatError> {
        Ok(self.messages.recent(group, limit)?)
    }
}
