//! Session store (spec.md §3/§9): a single versioned JSON document holding
//! every chat's per-engine resume tokens, written atomically via
//! temp-file + rename. Readers tolerate a missing or malformed file by
//! starting from empty state.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;

use bob_core::atomic::{read_json_or_default_async, write_json_atomic_async};
use bob_core::{ChatId, ThreadId};

use crate::error::Result;
use crate::types::{doc_key, ChatSession, EngineSession, SessionContext, SessionDocument, CURRENT_VERSION};

pub struct SessionStore {
    path: PathBuf,
    doc: RwLock<SessionDocument>,
}

impl SessionStore {
    /// Load `path` (or start empty), comparing the stored `cwd` against
    /// `current_cwd`. A mismatch invalidates every resume token but keeps
    /// `context`/`defaultEngine` — only the engine-specific resume state is
    /// cwd-scoped. A version mismatch drops the whole document.
    pub async fn load(path: PathBuf, current_cwd: &str) -> Result<Self> {
        let mut doc: SessionDocument = read_json_or_default_async(&path).await;

        if doc.version != CURRENT_VERSION {
            doc = SessionDocument::default();
        }

        let cwd_changed = doc.cwd.as_deref() != Some(current_cwd);
        if cwd_changed {
            for session in doc.sessions.values_mut() {
                session.sessions_by_engine.clear();
            }
            doc.cwd = Some(current_cwd.to_string());
        }

        let store = Self {
            path,
            doc: RwLock::new(doc),
        };
        if cwd_changed {
            store.persist().await?;
        }
        Ok(store)
    }

    async fn persist(&self) -> Result<()> {
        let doc = self.doc.read().await;
        write_json_atomic_async(&self.path, &*doc).await?;
        Ok(())
    }

    /// The resume token for `(chat, engine)`, if one exists.
    pub async fn resume_token(
        &self,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        engine_id: &str,
    ) -> Option<String> {
        let doc = self.doc.read().await;
        doc.sessions
            .get(&doc_key(chat_id, thread_id))
            .and_then(|s| s.sessions_by_engine.get(engine_id))
            .map(|e| e.resume_token.clone())
    }

    /// Record a new resume token for `(chat, engine)`, overwriting any prior
    /// one (at most one resume token per `(chat, engine)`).
    pub async fn set_resume_token(
        &self,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        engine_id: &str,
        resume_token: String,
    ) -> Result<()> {
        let key = doc_key(chat_id, thread_id);
        {
            let mut doc = self.doc.write().await;
            let session = doc.sessions.entry(key).or_insert_with(ChatSession::default);
            session.sessions_by_engine.insert(
                engine_id.to_string(),
                EngineSession {
                    resume_token,
                    updated_at: Utc::now(),
                },
            );
        }
        self.persist().await
    }

    /// Drop every resume token for a chat (e.g. on explicit `/status`-driven
    /// reset, or a project/branch switch that invalidates prior context).
    pub async fn clear_resume_tokens(&self, chat_id: ChatId, thread_id: Option<ThreadId>) -> Result<()> {
        {
            let mut doc = self.doc.write().await;
            if let Some(session) = doc.sessions.get_mut(&doc_key(chat_id, thread_id)) {
                session.sessions_by_engine.clear();
            }
        }
        self.persist().await
    }

    pub async fn context(&self, chat_id: ChatId, thread_id: Option<ThreadId>) -> Option<SessionContext> {
        let doc = self.doc.read().await;
        doc.sessions
            .get(&doc_key(chat_id, thread_id))
            .and_then(|s| s.context.clone())
    }

    pub async fn set_context(
        &self,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        context: SessionContext,
    ) -> Result<()> {
        let key = doc_key(chat_id, thread_id);
        {
            let mut doc = self.doc.write().await;
            let session = doc.sessions.entry(key).or_insert_with(ChatSession::default);
            session.context = Some(context);
        }
        self.persist().await
    }

    pub async fn default_engine(&self, chat_id: ChatId, thread_id: Option<ThreadId>) -> Option<String> {
        let doc = self.doc.read().await;
        doc.sessions
            .get(&doc_key(chat_id, thread_id))
            .and_then(|s| s.default_engine.clone())
    }

    /// `/agent` toggles the chat's default engine (spec.md §6).
    pub async fn set_default_engine(
        &self,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        engine_id: String,
    ) -> Result<()> {
        let key = doc_key(chat_id, thread_id);
        {
            let mut doc = self.doc.write().await;
            let session = doc.sessions.entry(key).or_insert_with(ChatSession::default);
            session.default_engine = Some(engine_id);
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resume_token_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::load(path.clone(), "/work").await.unwrap();

        store
            .set_resume_token(ChatId(1), None, "claude", "tok-1".into())
            .await
            .unwrap();
        let tok = store.resume_token(ChatId(1), None, "claude").await;
        assert_eq!(tok, Some("tok-1".to_string()));

        // A fresh load under the same cwd preserves the token.
        let reloaded = SessionStore::load(path, "/work").await.unwrap();
        let tok2 = reloaded.resume_token(ChatId(1), None, "claude").await;
        assert_eq!(tok2, Some("tok-1".to_string()));
    }

    #[tokio::test]
    async fn cwd_change_invalidates_all_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::load(path.clone(), "/work").await.unwrap();
        store
            .set_resume_token(ChatId(1), None, "claude", "tok-1".into())
            .await
            .unwrap();
        drop(store);

        let reloaded = SessionStore::load(path, "/other").await.unwrap();
        let tok = reloaded.resume_token(ChatId(1), None, "claude").await;
        assert_eq!(tok, None);
    }

    #[tokio::test]
    async fn at_most_one_token_per_chat_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::load(path, "/work").await.unwrap();
        store
            .set_resume_token(ChatId(5), None, "claude", "a".into())
            .await
            .unwrap();
        store
            .set_resume_token(ChatId(5), None, "claude", "b".into())
            .await
            .unwrap();
        assert_eq!(
            store.resume_token(ChatId(5), None, "claude").await,
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn distinct_threads_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::load(path, "/work").await.unwrap();
        store
            .set_resume_token(ChatId(5), Some(ThreadId(1)), "claude", "a".into())
            .await
            .unwrap();
        assert_eq!(store.resume_token(ChatId(5), None, "claude").await, None);
        assert_eq!(
            store.resume_token(ChatId(5), Some(ThreadId(1)), "claude").await,
            Some("a".to_string())
        );
    }
}
