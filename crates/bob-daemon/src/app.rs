//! `DaemonSink`: the seam between `bob-scheduler`'s `JobSink`/`HeartbeatSink`
//! traits and the rest of the daemon — resolves a chat's engine, assembles
//! an `EngineRequest`, and drives it through `bob_telegram::turn::run`
//! (spec.md §4.6, §4.7).

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::warn;

use bob_core::{ChatId, ThreadId};
use bob_engine::{Engine, EngineRequest};
use bob_scheduler::{ContextMode, Event, HeartbeatSink, JobSink};
use bob_telegram::{turn, BobContext, Turn};

pub struct DaemonSink {
    pub bot: Bot,
    pub ctx: Arc<BobContext>,
}

impl DaemonSink {
    pub fn new(bot: Bot, ctx: Arc<BobContext>) -> Self {
        Self { bot, ctx }
    }

    /// `/agent`'s default-engine setting, falling back to the project's and
    /// then the global default (same resolution order as the live message
    /// handler).
    async fn resolve_engine(&self, chat_id: ChatId, thread_id: Option<ThreadId>) -> Option<(String, Arc<dyn Engine>)> {
        let session_context = self.ctx.sessions.context(chat_id, thread_id).await;
        let project_cfg = session_context
            .as_ref()
            .and_then(|c| c.project.as_ref())
            .and_then(|p| self.ctx.config.projects.get(p));

        let engine_id = self
            .ctx
            .sessions
            .default_engine(chat_id, thread_id)
            .await
            .or_else(|| project_cfg.and_then(|p| p.default_engine.clone()))
            .unwrap_or_else(|| self.ctx.config.default_engine.clone());

        let engine = self.ctx.engines.get(&engine_id)?;
        Some((engine_id, engine))
    }

    fn tg_ids(&self, chat_id: i64, thread_id: Option<i64>) -> (teloxide::types::ChatId, Option<teloxide::types::ThreadId>) {
        (
            teloxide::types::ChatId(chat_id),
            thread_id.map(|t| teloxide::types::ThreadId(teloxide::types::MessageId(t as i32))),
        )
    }
}

#[async_trait]
impl JobSink for DaemonSink {
    async fn send_message(&self, chat_id: i64, thread_id: Option<i64>, text: &str) -> Result<(), String> {
        let (tg_chat_id, tg_thread_id) = self.tg_ids(chat_id, thread_id);
        bob_telegram::send::send_plain(&self.bot, tg_chat_id, tg_thread_id, None, text)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn agent_turn(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        prompt: &str,
        context_mode: ContextMode,
    ) -> Result<(), String> {
        let chat = ChatId(chat_id);
        let thread = thread_id.map(ThreadId);

        let Some((engine_id, engine)) = self.resolve_engine(chat, thread).await else {
            return Err("no engine available for chat".to_string());
        };

        let session_context = self.ctx.sessions.context(chat, thread).await;
        let project_cfg = session_context
            .as_ref()
            .and_then(|c| c.project.as_ref())
            .and_then(|p| self.ctx.config.projects.get(p));
        let cwd = project_cfg.map(|p| p.path.clone());
        let flags = self.ctx.engines.flags_for(&engine_id);

        let resume_token = match context_mode {
            ContextMode::Session => self.ctx.sessions.resume_token(chat, thread, &engine_id).await,
            ContextMode::Isolated => None,
        };

        let request = EngineRequest {
            prompt: prompt.to_string(),
            images: Vec::new(),
            cwd,
            resume_token,
            flags,
        };

        let (tg_chat_id, tg_thread_id) = self.tg_ids(chat_id, thread_id);
        let run = Turn {
            chat_id: chat,
            thread_id: thread,
            tg_chat_id,
            tg_thread_id,
            initiator: None,
            engine_id,
            engine,
            request,
            persist_session: matches!(context_mode, ContextMode::Session),
        };

        turn::run(self.bot.clone(), Arc::clone(&self.ctx), run).await.map(|_| ())
    }
}

#[async_trait]
impl HeartbeatSink for DaemonSink {
    async fn dispatch_group(&self, chat_id: i64, thread_id: Option<i64>, events: &[Event]) -> Result<(), String> {
        let chat = ChatId(chat_id);
        let thread = thread_id.map(ThreadId);

        let Some((engine_id, engine)) = self.resolve_engine(chat, thread).await else {
            warn!(chat_id, "heartbeat: no engine configured for chat, skipping group");
            return Ok(());
        };

        let prompt = build_heartbeat_prompt(&self.ctx, chat, thread, events).await;

        let session_context = self.ctx.sessions.context(chat, thread).await;
        let project_cfg = session_context
            .as_ref()
            .and_then(|c| c.project.as_ref())
            .and_then(|p| self.ctx.config.projects.get(p));
        let cwd = project_cfg.map(|p| p.path.clone());
        let flags = self.ctx.engines.flags_for(&engine_id);
        let resume_token = self.ctx.sessions.resume_token(chat, thread, &engine_id).await;

        let request = EngineRequest {
            prompt,
            images: Vec::new(),
            cwd,
            resume_token,
            flags,
        };

        let (tg_chat_id, tg_thread_id) = self.tg_ids(chat_id, thread_id);
        let run = Turn {
            chat_id: chat,
            thread_id: thread,
            tg_chat_id,
            tg_thread_id,
            initiator: None,
            engine_id,
            engine,
            request,
            persist_session: true,
        };

        turn::run(self.bot.clone(), Arc::clone(&self.ctx), run).await.map(|_| ())
    }
}

/// How many recent messages to pull into a heartbeat prompt (spec.md §4.6
/// step 3d: "the recent message-log slice for that conversation").
const HEARTBEAT_RECENT_MESSAGES: i64 = 20;

/// Assemble the heartbeat prompt per spec.md §4.6 step 3: (a) an optional
/// user-authored context file override, (b) the configured instruction,
/// (c) the claimed event group in `createdAt` order, (d) the recent
/// message-log slice for the conversation.
async fn build_heartbeat_prompt(ctx: &BobContext, chat_id: ChatId, thread_id: Option<ThreadId>, events: &[Event]) -> String {
    let mut sections = Vec::new();

    if let Some(path) = &ctx.config.heartbeat.file {
        if let Ok(contents) = tokio::fs::read_to_string(path).await {
            sections.push(contents.trim().to_string());
        }
    }

    sections.push(ctx.config.heartbeat.prompt.clone());

    let mut event_lines = vec!["Queued events:".to_string()];
    for ev in events {
        event_lines.push(format!("- [{}] {}: {}", ev.created_at.to_rfc3339(), ev.kind, ev.payload));
    }
    sections.push(event_lines.join("\n"));

    if let Ok(recent) = ctx
        .messages
        .recent(chat_id.0, thread_id.map(|t| t.0), HEARTBEAT_RECENT_MESSAGES)
    {
        if !recent.is_empty() {
            let mut lines = vec!["Recent conversation:".to_string()];
            lines.extend(recent.into_iter().map(|m| format!("{}: {}", m.role, m.text)));
            sections.push(lines.join("\n"));
        }
    }

    sections.join("\n\n")
}
