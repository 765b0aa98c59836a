//! The streaming reply state machine (spec.md §4.8): projects an engine's
//! token stream into chat-visible messages with low latency and without
//! duplicates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bob_engine::EngineAction;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chunker::{split_into_chunks, DEFAULT_MAX_GRAPHEMES};
use crate::directives::{parse_directives, StreamMode};
use crate::sanitize::strip_reasoning_wrappers;
use crate::transport::{render, EditOutcome, MessageId, ReplyTransport};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(900);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Edit,
    Append,
    Silent,
}

impl From<StreamMode> for Mode {
    fn from(m: StreamMode) -> Self {
        match m {
            StreamMode::Edit => Mode::Edit,
            StreamMode::Append => Mode::Append,
            StreamMode::Off => Mode::Silent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplyConfig {
    pub flush_interval: Duration,
    pub max_chunk_graphemes: usize,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_chunk_graphemes: DEFAULT_MAX_GRAPHEMES,
        }
    }
}

/// `{didSend, didReact, responseText, actions}` (spec.md §4.8).
#[derive(Debug, Clone, Default)]
pub struct ReplyOutcome {
    pub did_send: bool,
    pub did_react: bool,
    pub response_text: String,
    pub actions: Vec<EngineAction>,
}

struct Inner {
    buffer: String,
    mode: Mode,
    sent_message_id: Option<MessageId>,
    last_sent_text: String,
    last_rendered_text: String,
    last_flush_at: Option<Instant>,
    scheduled: bool,
    did_trigger_send: bool,
    reply_to_override: Option<MessageId>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            mode: Mode::Edit,
            sent_message_id: None,
            last_sent_text: String::new(),
            last_rendered_text: String::new(),
            last_flush_at: None,
            scheduled: false,
            did_trigger_send: false,
            reply_to_override: None,
        }
    }
}

/// Serializes flushes per reply via a mutex + single-slot scheduled timer —
/// never via a global lock (spec.md §5's mutual-exclusion model).
pub struct StreamCoordinator<T: ReplyTransport + 'static> {
    transport: Arc<T>,
    config: ReplyConfig,
    initiator_message_id: Option<MessageId>,
    inner: Mutex<Inner>,
    flush_lock: Mutex<()>,
    cancelled: AtomicBool,
}

impl<T: ReplyTransport + 'static> StreamCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        config: ReplyConfig,
        initiator_message_id: Option<MessageId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            initiator_message_id,
            inner: Mutex::new(Inner::default()),
            flush_lock: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Suppresses further flushes (spec.md §5's `isCancelled` hook).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Append one delta, maybe trigger the typing indicator, and schedule a
    /// debounced flush (spec.md §4.8: "schedule a flush after ~900 ms,
    /// coalesced").
    pub async fn on_delta(self: &Arc<Self>, text: &str) {
        if self.is_cancelled() {
            return;
        }

        let should_spawn = {
            let mut inner = self.inner.lock().await;
            inner.buffer.push_str(text);

            let (visible, parsed) = parse_directives(&inner.buffer);
            if !inner.did_trigger_send && !parsed.silent && !visible.trim().is_empty() {
                inner.did_trigger_send = true;
                self.transport.start_typing().await;
            }

            if inner.scheduled {
                false
            } else {
                inner.scheduled = true;
                true
            }
        };

        if should_spawn {
            let this = Arc::clone(self);
            let interval = self.config.flush_interval;
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                {
                    let mut inner = this.inner.lock().await;
                    inner.scheduled = false;
                }
                let _ = this.do_flush(false).await;
            });
        }
    }

    /// Replace the buffer with the engine's authoritative final text and
    /// perform a synchronous final flush.
    pub async fn finalize(self: &Arc<Self>, final_text: &str, actions: Vec<EngineAction>) -> ReplyOutcome {
        {
            let mut inner = self.inner.lock().await;
            inner.buffer = final_text.to_string();
        }
        let mut outcome = self.do_flush(true).await;
        outcome.actions = actions;
        self.transport.stop_typing().await;
        outcome
    }

    async fn do_flush(self: &Arc<Self>, is_final: bool) -> ReplyOutcome {
        let _flush_guard = self.flush_lock.lock().await;
        if self.is_cancelled() {
            return ReplyOutcome::default();
        }

        let (visible, parsed, mode_snapshot) = {
            let mut inner = self.inner.lock().await;
            let (visible, parsed) = parse_directives(&inner.buffer);
            if let Some(stream_mode) = parsed.stream_mode {
                inner.mode = stream_mode.into();
            }
            if parsed.reply_to_current {
                inner.reply_to_override = self.initiator_message_id;
            } else if let Some(id) = parsed.reply_to {
                inner.reply_to_override = Some(id);
            }
            (visible, parsed, inner.mode)
        };

        let effective_silent = mode_snapshot == Mode::Silent || parsed.silent;

        if effective_silent {
            if !is_final {
                return ReplyOutcome::default();
            }
            return self.flush_silent_final(&parsed).await;
        }

        let cleaned = strip_reasoning_wrappers(&visible);
        let cleaned = cleaned.trim_end().to_string();

        {
            let inner = self.inner.lock().await;
            if let Some(last) = inner.last_flush_at {
                if !is_final && Instant::now().duration_since(last) < self.config.flush_interval {
                    drop(inner);
                    self.reschedule().await;
                    return ReplyOutcome::default();
                }
            }
        }

        if cleaned.is_empty() {
            return ReplyOutcome::default();
        }

        {
            let inner = self.inner.lock().await;
            if cleaned == inner.last_rendered_text {
                return ReplyOutcome::default();
            }
        }

        let outcome = {
            let mode = { self.inner.lock().await.mode };
            match mode {
                Mode::Append => self.flush_append(&cleaned).await,
                _ => self.flush_edit(&cleaned, is_final).await,
            }
        };

        {
            let mut inner = self.inner.lock().await;
            inner.last_flush_at = Some(Instant::now());
            inner.last_rendered_text = cleaned.clone();
        }

        ReplyOutcome {
            did_send: outcome,
            did_react: false,
            response_text: cleaned,
            actions: Vec::new(),
        }
    }

    async fn reschedule(self: &Arc<Self>) {
        let should_spawn = {
            let mut inner = self.inner.lock().await;
            if inner.scheduled {
                false
            } else {
                inner.scheduled = true;
                true
            }
        };
        if should_spawn {
            let this = Arc::clone(self);
            let interval = self.config.flush_interval;
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                {
                    let mut inner = this.inner.lock().await;
                    inner.scheduled = false;
                }
                let _ = this.do_flush(false).await;
            });
        }
    }

    async fn flush_silent_final(self: &Arc<Self>, parsed: &crate::directives::ParsedDirectives) -> ReplyOutcome {
        let Some(initiator) = self.initiator_message_id else {
            return ReplyOutcome::default();
        };
        let emoji = parsed.react.clone().unwrap_or_else(|| "👍".to_string());

        match self.transport.react(initiator, &emoji).await {
            Ok(()) => ReplyOutcome {
                did_send: false,
                did_react: true,
                response_text: String::new(),
                actions: Vec::new(),
            },
            Err(e) => {
                warn!(error = %e, "reaction failed, falling back to text reaction");
                let text = render(&emoji);
                let _ = self.transport.send(&text, Some(initiator)).await;
                ReplyOutcome {
                    did_send: true,
                    did_react: false,
                    response_text: emoji,
                    actions: Vec::new(),
                }
            }
        }
    }

    async fn flush_append(self: &Arc<Self>, text: &str) -> bool {
        let (delta, reply_to) = {
            let inner = self.inner.lock().await;
            let delta = text.strip_prefix(inner.last_sent_text.as_str()).unwrap_or(text);
            (delta.to_string(), inner.reply_to_override.or(self.initiator_message_id))
        };
        if delta.is_empty() {
            return false;
        }
        let rendered = render(&delta);
        match self.transport.send(&rendered, reply_to).await {
            Ok(id) => {
                let mut inner = self.inner.lock().await;
                if inner.sent_message_id.is_none() {
                    inner.sent_message_id = Some(id);
                }
                inner.last_sent_text = text.to_string();
                true
            }
            Err(e) => {
                warn!(error = %e, "append-mode send failed");
                false
            }
        }
    }

    async fn flush_edit(self: &Arc<Self>, text: &str, is_final: bool) -> bool {
        let limit = self.config.max_chunk_graphemes;
        let chunks = split_into_chunks(text, limit);
        if chunks.is_empty() {
            return false;
        }
        let first = &chunks[0];

        let (sent_id, reply_to) = {
            let inner = self.inner.lock().await;
            (inner.sent_message_id, inner.reply_to_override.or(self.initiator_message_id))
        };

        let mut sent_any = false;
        let rendered_first = render(first);

        match sent_id {
            None => match self.transport.send(&rendered_first, reply_to).await {
                Ok(id) => {
                    self.inner.lock().await.sent_message_id = Some(id);
                    sent_any = true;
                }
                Err(e) => warn!(error = %e, "initial edit-mode send failed"),
            },
            Some(id) => match self.transport.edit(id, &rendered_first).await {
                Ok(EditOutcome::Edited) => sent_any = true,
                Ok(EditOutcome::NotModified) => {}
                Err(e) => {
                    debug!(error = %e, "edit failed, falling back to a fresh message in append mode");
                    match self.transport.send(&rendered_first, reply_to).await {
                        Ok(new_id) => {
                            let mut inner = self.inner.lock().await;
                            inner.sent_message_id = Some(new_id);
                            inner.mode = Mode::Append;
                            inner.last_sent_text = first.clone();
                            sent_any = true;
                        }
                        Err(e) => warn!(error = %e, "fallback send also failed"),
                    }
                }
            },
        }

        if is_final {
            for chunk in &chunks[1..] {
                let rendered = render(chunk);
                if self.transport.send(&rendered, None).await.is_ok() {
                    sent_any = true;
                }
            }
        }

        sent_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use tokio::sync::Mutex as TokioMutex;

    struct FakeTransport {
        next_id: AtomicI64,
        sent: TokioMutex<Vec<(Option<MessageId>, String)>>,
        edits: TokioMutex<Vec<(MessageId, String)>>,
        reactions: TokioMutex<Vec<(MessageId, String)>>,
        fail_edit: AtomicBool,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1),
                sent: TokioMutex::new(Vec::new()),
                edits: TokioMutex::new(Vec::new()),
                reactions: TokioMutex::new(Vec::new()),
                fail_edit: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl ReplyTransport for FakeTransport {
        async fn send(&self, text: &crate::transport::RenderedText, reply_to: Option<MessageId>) -> crate::error::Result<MessageId> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().await.push((reply_to, text.text.clone()));
            Ok(id)
        }

        async fn edit(&self, message_id: MessageId, text: &crate::transport::RenderedText) -> crate::error::Result<EditOutcome> {
            if self.fail_edit.load(Ordering::SeqCst) {
                return Err(crate::error::ReplyError::Transport("boom".into()));
            }
            self.edits.lock().await.push((message_id, text.text.clone()));
            Ok(EditOutcome::Edited)
        }

        async fn react(&self, message_id: MessageId, emoji: &str) -> crate::error::Result<()> {
            self.reactions.lock().await.push((message_id, emoji.to_string()));
            Ok(())
        }

        async fn start_typing(&self) {}
        async fn stop_typing(&self) {}
    }

    #[tokio::test]
    async fn finalize_sends_cleaned_text_in_edit_mode() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = StreamCoordinator::new(transport.clone(), ReplyConfig::default(), Some(100));

        let outcome = coordinator.finalize("hello there", vec![]).await;
        assert!(outcome.did_send);
        assert_eq!(outcome.response_text, "hello there");
        assert_eq!(transport.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn second_final_flush_edits_existing_message() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = StreamCoordinator::new(transport.clone(), ReplyConfig::default(), Some(100));

        coordinator.finalize("first", vec![]).await;
        // Simulate a second turn reusing the coordinator's sent_message_id by
        // forcing another flush directly (normally a new coordinator is used
        // per turn; this exercises the edit path in isolation).
        {
            let mut inner = coordinator.inner.lock().await;
            inner.last_flush_at = None;
            inner.buffer = "first updated".to_string();
        }
        coordinator.do_flush(true).await;
        assert_eq!(transport.edits.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn silent_token_suppresses_output_and_reacts() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = StreamCoordinator::new(transport.clone(), ReplyConfig::default(), Some(7));

        let outcome = coordinator.finalize("HEARTBEAT_OK", vec![]).await;
        assert!(!outcome.did_send);
        assert!(outcome.did_react);
        assert_eq!(transport.reactions.lock().await.len(), 1);
        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stream_append_directive_switches_mode() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = StreamCoordinator::new(transport.clone(), ReplyConfig::default(), Some(1));

        let outcome = coordinator
            .finalize("[[stream: append]]chunk one", vec![])
            .await;
        assert!(outcome.did_send);
        assert_eq!(transport.sent.lock().await[0].1, "chunk one");
    }

    #[tokio::test]
    async fn edit_failure_falls_back_to_append_mode() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = StreamCoordinator::new(transport.clone(), ReplyConfig::default(), Some(1));

        coordinator.finalize("first message", vec![]).await;
        transport.fail_edit.store(true, Ordering::SeqCst);
        {
            let mut inner = coordinator.inner.lock().await;
            inner.last_flush_at = None;
            inner.buffer = "first message continues".to_string();
        }
        coordinator.do_flush(true).await;

        assert_eq!(transport.sent.lock().await.len(), 2);
        assert!(transport.edits.lock().await.is_empty());
    }
}
