use crate::ids::UserId;
use crate::models::Message;

/// Turns core data into the opaque payload sent to a client.
pub trait Renderer: Send + Sync {
    /// Render `message` as seen by `viewer` (e.g. to mark the viewer's own messages).
    fn render_message(&self, message: &Message, viewer: &UserId) -> String;

    fn render_presence(&self, online_count: i64) -> String;
}
