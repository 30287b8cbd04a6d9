use rtchat_core::{Message, Renderer, UserId};
use serde_json::json;

/// Renders payloads as JSON text frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render_message(&self, message: &Message, viewer: &UserId) -> String {
        json!({
            "type": "message",
            "id": message.id,
            "group_id": message.group_id,
            "author": message.author,
            "body": message.body,
            "created_at": message.created_at,
            "own": &message.author == viewer,
        })
        .to_string()
    }

    fn render_presence(&self, online_count: i64) -> String {
        json!({
            "type": "online_count",
            "online_count": online_count,
        })
        .to_string()
    }
}
