use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, MessageId, UserId};

/// A named chat room. The online set is not carried here: it is owned by
/// the store and mutated only through presence tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub is_private: bool,
    /// Permitted members. Only consulted for private groups.
    pub members: Vec<UserId>,
    pub created_at: String,
}

impl Group {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.iter().any(|m| m == user)
    }
}

/// An immutable chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub group_id: GroupId,
    pub author: UserId,
    pub body: String,
    pub created_at: String,
}

/// What "online" means for a group's online set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceMode {
    /// A user stays online until their last connection to the group closes.
    #[default]
    PerUser,
    /// Any single disconnect takes the user offline, even if other
    /// connections of theirs to the group are still open.
    Legacy,
}
