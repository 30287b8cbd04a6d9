use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, MessageId};

/// An event fanned out to every subscriber of a group.
///
/// Message events carry only the id; each receiving session re-reads the
/// message from the store before rendering it for its own viewer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageCreated {
        group_id: GroupId,
        message_id: MessageId,
    },
    /// Online members other than the viewer (store count minus one).
    OnlineCount {
        group_id: GroupId,
        online_count: i64,
    },
}

impl ChatEvent {
    pub fn group_id(&self) -> &GroupId {
        match self {
            Self::MessageCreated { group_id, .. } | Self::OnlineCount { group_id, .. } => group_id,
        }
    }

    /// Short event name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::OnlineCount { .. } => "online_count",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_event_wire_shape() {
        let event = ChatEvent::MessageCreated {
            group_id: GroupId::from("lobby"),
            message_id: MessageId::new(12),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_created");
        assert_eq!(json["group_id"], "lobby");
        assert_eq!(json["message_id"], 12);
    }

    #[test]
    fn online_count_event_parses() {
        let raw = r#"{"type":"online_count","group_id":"lobby","online_count":3}"#;
        let event: ChatEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type(), "online_count");
        assert_eq!(event.group_id().as_str(), "lobby");
    }
}
