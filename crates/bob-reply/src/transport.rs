//! The seam between the streaming reply engine and a concrete chat
//! transport (spec.md §6 names Telegram; `bob-telegram` implements this
//! trait over teloxide).

use async_trait::async_trait;

use crate::error::Result;

/// A transport-native message identifier (Telegram's is an `i32`, widened
/// here so other transports aren't constrained to that range).
pub type MessageId = i64;

/// Rich-text spans produced by rendering markdown to transport-native
/// entities (spec.md §4.8 step 6: "render the cleaned text to
/// transport-native rich-text entities"). Kept deliberately opaque here —
/// the transport owns the actual entity format.
#[derive(Debug, Clone)]
pub struct RenderedText {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Edited,
    /// The transport reported "message not modified" — not an error
    /// (spec.md §4.8 step 6).
    NotModified,
}

#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn send(&self, text: &RenderedText, reply_to: Option<MessageId>) -> Result<MessageId>;

    async fn edit(&self, message_id: MessageId, text: &RenderedText) -> Result<EditOutcome>;

    async fn react(&self, message_id: MessageId, emoji: &str) -> Result<()>;

    async fn start_typing(&self);

    async fn stop_typing(&self);
}

pub fn render(text: &str) -> RenderedText {
    RenderedText { text: text.to_string() }
}
