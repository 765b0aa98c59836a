use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `scheduleKind` (spec.md §3/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    At,
    Every,
    Cron,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::At => write!(f, "at"),
            ScheduleKind::Every => write!(f, "every"),
            ScheduleKind::Cron => write!(f, "cron"),
        }
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "at" => Ok(ScheduleKind::At),
            "every" => Ok(ScheduleKind::Every),
            "cron" => Ok(ScheduleKind::Cron),
            other => Err(format!("unknown schedule kind: {other}")),
        }
    }
}

/// `jobType` (spec.md §3/§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SendMessage,
    AgentTurn,
    Script,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::SendMessage => write!(f, "send_message"),
            JobType::AgentTurn => write!(f, "agent_turn"),
            JobType::Script => write!(f, "script"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(JobType::SendMessage),
            "agent_turn" => Ok(JobType::AgentTurn),
            "script" => Ok(JobType::Script),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// `contextMode` (spec.md §3, §4.7, §9 open question (b)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    Session,
    Isolated,
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextMode::Session => write!(f, "session"),
            ContextMode::Isolated => write!(f, "isolated"),
        }
    }
}

impl std::str::FromStr for ContextMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "session" => Ok(ContextMode::Session),
            "isolated" => Ok(ContextMode::Isolated),
            other => Err(format!("unknown context mode: {other}")),
        }
    }
}

/// A persisted job row (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub schedule_kind: ScheduleKind,
    pub schedule_spec: String,
    pub job_type: JobType,
    /// Opaque JSON payload forwarded to the job executor.
    pub payload: serde_json::Value,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub context_mode: ContextMode,
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::jobs::JobStore::add`].
pub struct NewJob {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub schedule_kind: ScheduleKind,
    pub schedule_spec: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub context_mode: ContextMode,
}

/// An event row (spec.md §3/§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

pub struct NewEvent {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Payload for `send_message` / `agent_turn` jobs delivered to a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageJobPayload {
    pub text: String,
    /// For `agent_turn`: the original user request this reminder was created
    /// from, quoted back into the prompt (spec.md §4.7).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgent: Option<bool>,
}

/// Payload for `script` jobs (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptJobPayload {
    /// Path relative to the fixed scripts root.
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Deliver stdout (success) / failure summary (non-zero exit) to the chat.
    #[serde(default)]
    pub notify: bool,
}
