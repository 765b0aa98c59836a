//! Reusable engine-turn execution: streams one engine invocation into a
//! chat through `bob-reply`'s `StreamCoordinator`.
//!
//! Used directly by the live message handler (`handler::handle_message`)
//! and by `bob-daemon`'s `JobSink`/`HeartbeatSink` implementations, which
//! have no live teloxide `Message` to hang a reply off of — only raw
//! `chat_id`/`thread_id` pairs.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ThreadId as TgThreadId;
use tracing::warn;

use bob_core::{ChatId, ThreadId};
use bob_engine::{DeltaSink, Engine, EngineRequest};
use bob_reply::{ReplyConfig, StreamCoordinator};
use bob_sessions::{NewMessage, Role};

use crate::context::BobContext;
use crate::send::TelegramTransport;

/// Everything needed to drive one streamed engine turn into a chat.
pub struct Turn {
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub tg_chat_id: teloxide::types::ChatId,
    pub tg_thread_id: Option<TgThreadId>,
    /// The message this turn is replying to, if any (unset for
    /// scheduler/heartbeat-originated turns).
    pub initiator: Option<teloxide::types::MessageId>,
    pub engine_id: String,
    pub engine: Arc<dyn Engine>,
    pub request: EngineRequest,
    /// Whether a returned `session_token` should be persisted as the
    /// chat's resume token. `false` for isolated scheduled jobs (spec.md
    /// §4.7), which must not clobber the chat's own ongoing session.
    pub persist_session: bool,
}

/// Run `turn.engine` with `turn.request`, streaming deltas into the chat as
/// they arrive and persisting the resulting resume token and the logged
/// assistant turn. Returns the final visible reply text — empty if the
/// turn was silent (e.g. a `HEARTBEAT_OK`/`NO_REPLY` sentinel).
pub async fn run(bot: Bot, ctx: Arc<BobContext>, turn: Turn) -> Result<String, String> {
    let transport = Arc::new(TelegramTransport::new(bot, turn.tg_chat_id, turn.tg_thread_id));
    let initiator_id = turn.initiator.map(|m| m.0 as i64);
    let coordinator = StreamCoordinator::new(transport, ReplyConfig::default(), initiator_id);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let coordinator_pump = Arc::clone(&coordinator);
    let pump = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            coordinator_pump.on_delta(&text).await;
        }
    });

    let sink: DeltaSink = Box::new(move |s: &str| {
        let _ = tx.send(s.to_string());
    });

    let outcome = match turn.engine.run(turn.request, sink).await {
        Ok(o) => o,
        Err(e) => {
            coordinator.cancel();
            let _ = pump.await;
            warn!(error = %e, chat = turn.chat_id.0, "engine run failed");
            return Err(e.to_string());
        }
    };

    let _ = pump.await;
    let reply_outcome = coordinator.finalize(&outcome.final_text, outcome.actions).await;

    if turn.persist_session {
        if let Some(token) = outcome.session_token {
            let _ = ctx
                .sessions
                .set_resume_token(turn.chat_id, turn.thread_id, &turn.engine_id, token)
                .await;
        }
    }

    if reply_outcome.did_send && !reply_outcome.response_text.is_empty() {
        let _ = ctx.messages.append(
            NewMessage {
                chat_id: turn.chat_id.0,
                thread_id: turn.thread_id.map(|t| t.0),
                message_id: None,
                role: Role::Assistant,
                text: reply_outcome.response_text.clone(),
            },
            chrono::Utc::now(),
        );
        append_conversation_log(&ctx, &turn.engine_id, &reply_outcome.response_text).await;
    }

    Ok(reply_outcome.response_text)
}

/// Append the assistant's text to `memory/conversations/YYYY/MM-DD-<engine>.md`
/// (spec.md §4.7, §6). Best-effort: a write failure is logged, not propagated,
/// since the turn itself already succeeded and was delivered.
async fn append_conversation_log(ctx: &BobContext, engine_id: &str, text: &str) {
    use tokio::io::AsyncWriteExt;

    let now = chrono::Utc::now();
    let dir = ctx.config.memory_dir().join("conversations").join(now.format("%Y").to_string());
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!(error = %e, "failed to create conversation log directory");
        return;
    }

    let path = dir.join(format!("{}-{engine_id}.md", now.format("%m-%d")));
    let entry = format!("## {}\n\n{text}\n\n", now.to_rfc3339());

    let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await;
    match file {
        Ok(mut file) => {
            if let Err(e) = file.write_all(entry.as_bytes()).await {
                warn!(error = %e, path = %path.display(), "failed to append conversation log");
            }
        }
        Err(e) => warn!(error = %e, path = %path.display(), "failed to open conversation log"),
    }
}
