use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One attached image, already fetched from the chat transport (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub media_type: String,
    pub bytes: Arc<Vec<u8>>,
}

/// Per-engine behaviour flags sourced from `[engines.<id>]` config.
#[derive(Debug, Clone, Default)]
pub struct EngineFlags {
    pub skip_permissions: bool,
    pub yolo: bool,
}

/// One turn's worth of input to an engine (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub prompt: String,
    pub images: Vec<ImageAttachment>,
    pub cwd: Option<String>,
    /// Opaque token previously returned as `EngineOutcome::session_token`,
    /// reused until the working directory changes (spec.md §6).
    pub resume_token: Option<String>,
    pub flags: EngineFlags,
}

/// A reported tool invocation the engine made while producing its reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub name: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Bash,
    Read,
    Write,
    Edit,
    Tool,
}

/// What an engine produced for one turn (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub final_text: String,
    pub actions: Vec<EngineAction>,
    /// Opaque session handle to persist and resume with, when the engine
    /// supports multi-turn continuation.
    pub session_token: Option<String>,
}

/// Called with each incremental text fragment as the engine produces it.
pub type DeltaSink = Box<dyn Fn(&str) + Send + Sync>;
