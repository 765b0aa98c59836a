//! Shared handles the Telegram handler needs for every incoming message.
//!
//! Built once in `bob-daemon` and passed into the teloxide `Dispatcher` as a
//! dependency, mirroring the single-shared-context pattern the adapter used
//! for its old `TelegramAppContext` trait object.

use std::sync::Arc;

use bob_core::config::BobConfig;
use bob_engine::EngineRegistry;
use bob_recall::RecallIndex;
use bob_scheduler::JobStore;
use bob_sessions::{MessageLog, SessionStore};

#[derive(Clone)]
pub struct BobContext {
    pub config: BobConfig,
    pub sessions: Arc<SessionStore>,
    pub messages: Arc<MessageLog>,
    pub engines: Arc<EngineRegistry>,
    pub recall: Option<Arc<RecallIndex>>,
    pub jobs: Arc<JobStore>,
}
