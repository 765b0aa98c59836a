use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bob_core::types::session_key;
use bob_core::{ChatId, ThreadId};

/// Current on-disk schema version. A mismatch drops content rather than
/// migrating it (spec.md §9: "on version mismatch, drop content rather
/// than migrate").
pub const CURRENT_VERSION: u32 = 1;

/// The whole `sessions.json` document (spec.md §3/§9): one versioned JSON
/// file, atomically rewritten, cheaper than per-key rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Working directory this document was last written under. Compared to
    /// the current cwd on startup; a mismatch invalidates every resume
    /// token (spec.md §3).
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub sessions: HashMap<String, ChatSession>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

impl Default for SessionDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            cwd: None,
            sessions: HashMap::new(),
        }
    }
}

/// Per-`(chatId, threadId)` session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSession {
    /// At most one resume token per `(chat, engine)` (spec.md §3 invariant).
    #[serde(default)]
    pub sessions_by_engine: HashMap<String, EngineSession>,
    #[serde(default)]
    pub context: Option<SessionContext>,
    #[serde(default)]
    pub default_engine: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSession {
    pub resume_token: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub project: Option<String>,
    pub branch: Option<String>,
}

/// Build the document key for a `(chatId, threadId)` pair. Reuses
/// `bob_core::types::session_key` so the on-disk key and the in-memory
/// session-log key agree.
pub fn doc_key(chat_id: ChatId, thread_id: Option<ThreadId>) -> String {
    session_key(chat_id, thread_id)
}

/// `role` of an appended message (spec.md §3: "Message").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A row in the append-only message log (spec.md §3: "used to feed 'recent
/// context' windows ... never mutated; deleted by retention policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub message_id: Option<i64>,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

pub struct NewMessage {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub message_id: Option<i64>,
    pub role: Role,
    pub text: String,
}
