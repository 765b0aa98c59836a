//! Telegram message handler registered in the teloxide `Dispatcher`
//! (spec.md §6).
//!
//! Runs for every incoming `Message`: allowlist + DM/mention guards,
//! leading-directive parsing (`/claude` &c., `/<project>`, `@<branch>`),
//! standalone commands (`/start`, `/status`, `/agent`, `/clear`, `/whoami`),
//! then a non-blocking streamed engine turn.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ReactionType;

use bob_core::{ChatId, ThreadId};
use bob_engine::EngineRequest;
use bob_sessions::{NewMessage, Role};

use crate::allow;
use crate::attach;
use crate::context::BobContext;
use crate::send;
use crate::turn::{self, Turn};

pub async fn handle_message(bot: Bot, msg: Message, ctx: Arc<BobContext>) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    if !allow::is_allowed(&ctx.config.telegram.allowlist, from.id.0 as i64) {
        return Ok(());
    }

    if msg.chat.is_private() && !ctx.config.telegram.dm_allowed {
        return Ok(());
    }

    if (msg.chat.is_group() || msg.chat.is_supergroup()) && ctx.config.telegram.require_mention {
        let bot_info = bot.get_me().await;
        let bot_username = bot_info
            .as_ref()
            .ok()
            .and_then(|me| me.user.username.as_deref())
            .unwrap_or("");
        let text_for_mention = msg.text().or(msg.caption()).unwrap_or("");
        if !contains_mention(text_for_mention, bot_username) {
            return Ok(());
        }
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let has_media = msg.photo().is_some() || msg.document().is_some() || msg.sticker().is_some();
    if text.is_empty() && !has_media {
        return Ok(());
    }

    let chat_id = ChatId(msg.chat.id.0);
    let thread_id = msg.thread_id.map(|t| ThreadId(t.0 .0 as i64));
    let tg_thread_id = msg.thread_id;

    if let Some(reply) = handle_standalone_command(&text, &ctx, chat_id, thread_id).await {
        let _ = send::send_plain(&bot, msg.chat.id, tg_thread_id, Some(msg.id), &reply).await;
        return Ok(());
    }

    if !ctx.config.telegram.ack_reaction.is_empty() {
        let reaction = vec![ReactionType::Emoji {
            emoji: ctx.config.telegram.ack_reaction.clone(),
        }];
        let _ = bot
            .set_message_reaction(msg.chat.id, msg.id)
            .reaction(reaction)
            .await;
    }

    let _ = ctx.messages.append(
        NewMessage {
            chat_id: chat_id.0,
            thread_id: thread_id.map(|t| t.0),
            message_id: Some(msg.id.0 as i64),
            role: Role::User,
            text: text.clone(),
        },
        chrono::Utc::now(),
    );

    let (directives, mut prompt_text) = parse_leading_directives(&text, &ctx);

    if directives.project.is_some() || directives.branch.is_some() {
        let mut context = ctx.sessions.context(chat_id, thread_id).await.unwrap_or_default();
        if let Some(p) = &directives.project {
            context.project = Some(p.clone());
        }
        if let Some(b) = &directives.branch {
            context.branch = Some(b.clone());
        }
        let _ = ctx.sessions.set_context(chat_id, thread_id, context).await;
    }

    if prompt_text.is_empty() {
        if has_media {
            prompt_text = "[User sent an image]".to_string();
        } else {
            // A directive-only message (e.g. bare "/claude") with nothing to run.
            return Ok(());
        }
    }

    let session_context = ctx.sessions.context(chat_id, thread_id).await;
    let project_cfg = session_context
        .as_ref()
        .and_then(|c| c.project.as_ref())
        .and_then(|p| ctx.config.projects.get(p));

    let default_engine = ctx
        .sessions
        .default_engine(chat_id, thread_id)
        .await
        .or_else(|| project_cfg.and_then(|p| p.default_engine.clone()))
        .unwrap_or_else(|| ctx.config.default_engine.clone());
    let engine_id = directives.engine_override.unwrap_or(default_engine);

    let Some(engine) = ctx.engines.get(&engine_id) else {
        let _ = send::send_plain(
            &bot,
            msg.chat.id,
            tg_thread_id,
            Some(msg.id),
            &format!("Unknown engine `{engine_id}`."),
        )
        .await;
        return Ok(());
    };

    let flags = ctx.engines.flags_for(&engine_id);
    let resume_token = ctx.sessions.resume_token(chat_id, thread_id, &engine_id).await;
    let cwd = project_cfg.map(|p| p.path.clone());
    let images = attach::extract_images(&bot, &msg, ctx.config.telegram.max_attachment_bytes).await;

    let req = EngineRequest {
        prompt: prompt_text,
        images,
        cwd,
        resume_token,
        flags,
    };

    let bot2 = bot.clone();
    let ctx2 = Arc::clone(&ctx);
    let chat_tg = msg.chat.id;
    let initiator = msg.id;

    tokio::spawn(async move {
        let turn = Turn {
            chat_id,
            thread_id,
            tg_chat_id: chat_tg,
            tg_thread_id,
            initiator: Some(initiator),
            engine_id,
            engine,
            request: req,
            persist_session: true,
        };
        if let Err(e) = turn::run(bot2.clone(), ctx2, turn).await {
            let _ = send::send_plain(&bot2, chat_tg, tg_thread_id, Some(initiator), &format!("⚠️ {e}")).await;
        }
    });

    Ok(())
}

#[derive(Debug, Default)]
struct InboundDirectives {
    engine_override: Option<String>,
    project: Option<String>,
    branch: Option<String>,
}

/// Strip leading `/engine`, `/<project>`, `@<branch>` tokens (spec.md §6)
/// from the start of `text`, returning the parsed directives and the
/// remaining prompt.
fn parse_leading_directives(text: &str, ctx: &BobContext) -> (InboundDirectives, String) {
    let mut out = InboundDirectives::default();
    let mut rest = text;

    loop {
        let trimmed = rest.trim_start();
        let (token, remainder) = match trimmed.find(char::is_whitespace) {
            Some(i) => (&trimmed[..i], &trimmed[i..]),
            None => (trimmed, ""),
        };

        if token.is_empty() {
            rest = trimmed;
            break;
        }

        if let Some(name) = token.strip_prefix('/') {
            if out.engine_override.is_none() && ctx.engines.get(name).is_some() {
                out.engine_override = Some(name.to_string());
                rest = remainder;
                continue;
            }
            if out.project.is_none() && ctx.config.projects.contains_key(name) {
                out.project = Some(name.to_string());
                rest = remainder;
                continue;
            }
        } else if let Some(branch) = token.strip_prefix('@') {
            if out.branch.is_none() {
                out.branch = Some(branch.to_string());
                rest = remainder;
                continue;
            }
        }

        rest = trimmed;
        break;
    }

    (out, rest.trim().to_string())
}

async fn handle_standalone_command(
    text: &str,
    ctx: &BobContext,
    chat_id: ChatId,
    thread_id: Option<ThreadId>,
) -> Option<String> {
    let trimmed = text.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("").trim();

    match cmd {
        "/start" => Some(
            "Hi, I'm bob. Send me a message, or try /status, /agent, /claude, /codex, /opencode, /pi."
                .to_string(),
        ),
        "/status" => Some(build_status_reply(ctx, chat_id, thread_id).await),
        "/agent" => Some(handle_agent_command(ctx, chat_id, thread_id, arg).await),
        "/clear" => {
            let _ = ctx.sessions.clear_resume_tokens(chat_id, thread_id).await;
            let removed = ctx
                .messages
                .clear_chat(chat_id.0, thread_id.map(|t| t.0))
                .unwrap_or(0);
            Some(format!(
                "Session cleared. Removed {removed} logged messages. Starting a fresh conversation."
            ))
        }
        "/whoami" => Some(format!(
            "chat `{}`{}",
            chat_id.0,
            thread_id.map(|t| format!(":{}", t.0)).unwrap_or_default()
        )),
        _ => None,
    }
}

async fn build_status_reply(ctx: &BobContext, chat_id: ChatId, thread_id: Option<ThreadId>) -> String {
    let engine = ctx
        .sessions
        .default_engine(chat_id, thread_id)
        .await
        .unwrap_or_else(|| ctx.config.default_engine.clone());

    let mut lines = vec![format!("Engine: `{engine}`")];

    match ctx.jobs.list_for_chat(chat_id.0) {
        Ok(jobs) => {
            let upcoming: Vec<_> = jobs.into_iter().filter(|j| j.enabled).take(10).collect();
            if upcoming.is_empty() {
                lines.push("No upcoming jobs.".to_string());
            } else {
                lines.push("Upcoming jobs:".to_string());
                for job in upcoming {
                    let next = job
                        .next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "—".to_string());
                    lines.push(format!("- {} ({}) next: {next}", job.job_type, job.schedule_kind));
                }
            }
        }
        Err(e) => lines.push(format!("(failed to list jobs: {e})")),
    }

    lines.join("\n")
}

async fn handle_agent_command(ctx: &BobContext, chat_id: ChatId, thread_id: Option<ThreadId>, arg: &str) -> String {
    if arg.is_empty() {
        let current = ctx
            .sessions
            .default_engine(chat_id, thread_id)
            .await
            .unwrap_or_else(|| ctx.config.default_engine.clone());
        return format!("Current default engine: `{current}`");
    }

    if ctx.engines.get(arg).is_none() {
        return format!("Unknown engine `{arg}`.");
    }

    match ctx.sessions.set_default_engine(chat_id, thread_id, arg.to_string()).await {
        Ok(()) => format!("Default engine set to `{arg}`."),
        Err(e) => format!("Failed to persist default engine: {e}"),
    }
}

fn contains_mention(text: &str, bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    let mention = format!("@{bot_username}");
    text.contains(&mention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_mention_positive() {
        assert!(contains_mention("Hey @mybot, help!", "mybot"));
    }

    #[test]
    fn contains_mention_negative() {
        assert!(!contains_mention("Hello there", "mybot"));
    }

    #[test]
    fn contains_mention_empty_username() {
        assert!(!contains_mention("@foo bar", ""));
    }
}
