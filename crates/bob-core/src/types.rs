use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-wide identity discriminator (spec.md §3: "all entities carry a
/// `bobId` discriminator ... so schemas admit future multi-tenant extension
/// without migration"). Every row is stamped with this constant; nothing in
/// this codebase branches on it.
pub const BOB_ID: &str = "bob";

/// A chat endpoint, identified by Telegram's numeric chat id, optionally
/// subdivided by a forum thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// System jobs (heartbeat housekeeping, crash-recovery notices) use chat id
/// 0 and must never address a real Telegram chat (spec.md §3).
pub const SYSTEM_CHAT_ID: ChatId = ChatId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ThreadId(pub i64);

/// Opaque per-request correlation id, not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build the session key for a `(chatId, threadId)` pair. Single-user, so
/// unlike the multi-tenant ancestor of this codebase there's no per-user
/// prefix — the chat is the whole identity.
pub fn session_key(chat_id: ChatId, thread_id: Option<ThreadId>) -> String {
    match thread_id {
        Some(t) => format!("chat:{}:{}", chat_id.0, t.0),
        None => format!("chat:{}", chat_id.0),
    }
}
