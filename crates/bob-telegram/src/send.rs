//! `ReplyTransport` implementation over a teloxide `Bot` (spec.md §6).
//!
//! Tries MarkdownV2 first; a "can't parse entities"-class error triggers a
//! one-shot retry with the raw text and no parse mode, per spec.md §6/§7.
//! Chunking is `bob-reply`'s job now — this module only escapes, sends,
//! edits, and reacts.

use tokio::sync::Mutex as AsyncMutex;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReactionType, ThreadId as TgThreadId};
use tracing::warn;

use bob_reply::{EditOutcome, MessageId as ReplyMessageId, RenderedText, ReplyError, ReplyTransport};

use crate::typing::TypingHandle;

/// Escape special characters for Telegram MarkdownV2.
///
/// MarkdownV2 requires escaping: `_ * [ ] ( ) ~ ` # + - = | { } . !`
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// `true` for the class of Bot API errors the MarkdownV2 escaping couldn't
/// prevent — triggers the one-shot entity-free retry (spec.md §7).
fn is_entity_error(e: &teloxide::RequestError) -> bool {
    let s = e.to_string().to_lowercase();
    s.contains("parse entities") || s.contains("entity")
}

fn is_not_modified(e: &teloxide::RequestError) -> bool {
    e.to_string().to_lowercase().contains("message is not modified")
}

/// Send `text` to `chat_id` (optionally inside `thread_id`, optionally as a
/// reply), trying MarkdownV2 first and falling back to a plain-text retry.
pub async fn send_plain(
    bot: &Bot,
    chat_id: ChatId,
    thread_id: Option<TgThreadId>,
    reply_to: Option<teloxide::types::MessageId>,
    text: &str,
) -> Result<teloxide::types::MessageId, teloxide::RequestError> {
    let escaped = escape_markdown_v2(text);
    let mut req = bot.send_message(chat_id, escaped).parse_mode(ParseMode::MarkdownV2);
    if let Some(t) = thread_id {
        req = req.message_thread_id(t);
    }
    if let Some(r) = reply_to {
        req = req.reply_to_message_id(r);
    }

    match req.await {
        Ok(msg) => Ok(msg.id),
        Err(e) if is_entity_error(&e) => {
            warn!(error = %e, "telegram: markdown entities rejected, retrying without parse mode");
            let mut retry = bot.send_message(chat_id, text);
            if let Some(t) = thread_id {
                retry = retry.message_thread_id(t);
            }
            if let Some(r) = reply_to {
                retry = retry.reply_to_message_id(r);
            }
            let msg = retry.await?;
            Ok(msg.id)
        }
        Err(e) => Err(e),
    }
}

/// Per-turn `ReplyTransport`: one instance lives for the duration of a
/// single streamed reply, bound to one chat (and optional forum thread).
pub struct TelegramTransport {
    bot: Bot,
    chat_id: ChatId,
    thread_id: Option<TgThreadId>,
    typing: AsyncMutex<Option<TypingHandle>>,
}

impl TelegramTransport {
    pub fn new(bot: Bot, chat_id: ChatId, thread_id: Option<TgThreadId>) -> Self {
        Self {
            bot,
            chat_id,
            thread_id,
            typing: AsyncMutex::new(None),
        }
    }
}

#[async_trait]
impl ReplyTransport for TelegramTransport {
    async fn send(&self, text: &RenderedText, reply_to: Option<ReplyMessageId>) -> bob_reply::Result<ReplyMessageId> {
        let reply_to = reply_to.map(|id| teloxide::types::MessageId(id as i32));
        send_plain(&self.bot, self.chat_id, self.thread_id, reply_to, &text.text)
            .await
            .map(|id| id.0 as i64)
            .map_err(|e| ReplyError::Transport(e.to_string()))
    }

    async fn edit(&self, message_id: ReplyMessageId, text: &RenderedText) -> bob_reply::Result<EditOutcome> {
        let mid = teloxide::types::MessageId(message_id as i32);
        let escaped = escape_markdown_v2(&text.text);

        let result = self
            .bot
            .edit_message_text(self.chat_id, mid, escaped)
            .parse_mode(ParseMode::MarkdownV2)
            .await;

        match result {
            Ok(_) => Ok(EditOutcome::Edited),
            Err(e) if is_not_modified(&e) => Ok(EditOutcome::NotModified),
            Err(e) if is_entity_error(&e) => {
                match self.bot.edit_message_text(self.chat_id, mid, &text.text).await {
                    Ok(_) => Ok(EditOutcome::Edited),
                    Err(e2) if is_not_modified(&e2) => Ok(EditOutcome::NotModified),
                    Err(e2) => Err(ReplyError::Transport(e2.to_string())),
                }
            }
            Err(e) => Err(ReplyError::Transport(e.to_string())),
        }
    }

    async fn react(&self, message_id: ReplyMessageId, emoji: &str) -> bob_reply::Result<()> {
        let mid = teloxide::types::MessageId(message_id as i32);
        let reaction = vec![ReactionType::Emoji { emoji: emoji.to_string() }];

        if self
            .bot
            .set_message_reaction(self.chat_id, mid)
            .reaction(reaction)
            .await
            .is_err()
        {
            // Reactions on failure fall back to an emoji text message (spec.md §6).
            let _ = send_plain(&self.bot, self.chat_id, self.thread_id, Some(mid), emoji).await;
        }
        Ok(())
    }

    async fn start_typing(&self) {
        let handle = TypingHandle::start(self.bot.clone(), self.chat_id);
        *self.typing.lock().await = Some(handle);
    }

    async fn stop_typing(&self) {
        if let Some(handle) = self.typing.lock().await.take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_markdown_v2_escapes_specials() {
        let input = "Hello. World! (test) [link] ~strike~";
        let escaped = escape_markdown_v2(input);
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\!"));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\)"));
        assert!(escaped.contains("\\["));
        assert!(escaped.contains("\\]"));
        assert!(escaped.contains("\\~"));
    }

    #[test]
    fn escape_markdown_v2_leaves_normal_chars() {
        let input = "Hello world 123 abc";
        assert_eq!(escape_markdown_v2(input), input);
    }
}
