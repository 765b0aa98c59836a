//! Telegram channel adapter: drives the long-polling `Dispatcher` loop for
//! the lifetime of the process (spec.md §6: "getUpdates long-poll" — no
//! public URL or webhook required).

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use crate::context::BobContext;
use crate::handler::handle_message;

pub struct TelegramAdapter {
    bot: Bot,
    ctx: Arc<BobContext>,
}

impl TelegramAdapter {
    /// `bot` is shared with the caller (e.g. `bob-daemon`'s `JobSink`/
    /// `HeartbeatSink`, which also need to send proactive messages).
    pub fn new(bot: Bot, ctx: Arc<BobContext>) -> Self {
        Self { bot, ctx }
    }

    /// Connect to Telegram and drive the long-polling loop.
    ///
    /// Never returns — runs for the lifetime of the process. Reconnects
    /// automatically on transport errors (teloxide's default `getUpdates`
    /// retry behaviour).
    pub async fn run(self) {
        info!("telegram: starting long-polling dispatcher");

        let ctx = self.ctx;
        let handler = Update::filter_message().endpoint(handle_message);

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![ctx])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
