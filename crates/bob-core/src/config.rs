//! `config.toml` + `BOB_*` env overrides, loaded via `figment` — same
//! layered-config idiom the teacher crate uses (`Figment::merge(Toml) ::
//! merge(Env::prefixed)`), generalized to the filesystem layout in
//! spec.md §6.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BobConfig {
    #[serde(default = "default_engine")]
    pub default_engine: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,

    pub telegram: TelegramConfig,

    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub dnd: DndConfig,
    #[serde(default)]
    pub projects: std::collections::HashMap<String, ProjectConfig>,
}

/// Telegram transport settings. `bot_token` and `allowlist` are
/// security-relevant: never defaulted, per spec.md §7 ("never silently
/// substitute defaults for security-relevant fields").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Numeric Telegram user ids. Empty means "no filter, deny-all-except-explicit"
    /// (spec.md §6) — i.e. nothing is allowed until at least one id is listed.
    #[serde(default)]
    pub allowlist: Vec<i64>,
    /// Emoji used for the eager "got it" reaction. Empty disables it.
    #[serde(default)]
    pub ack_reaction: String,
    #[serde(default)]
    pub dm_allowed: bool,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnginesConfig {
    pub claude: Option<ClaudeEngineConfig>,
    pub codex: Option<CodexEngineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeEngineConfig {
    #[serde(default)]
    pub skip_permissions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexEngineConfig {
    #[serde(default)]
    pub yolo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Instruction injected into the heartbeat prompt (spec.md §4.6).
    #[serde(default = "default_heartbeat_prompt")]
    pub prompt: String,
    /// Optional markdown file whose contents override/extend the prompt.
    pub file: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: default_heartbeat_prompt(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DndConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dnd_start")]
    pub start: String,
    #[serde(default = "default_dnd_end")]
    pub end: String,
}

impl Default for DndConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_dnd_start(),
            end: default_dnd_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub path: String,
    pub worktrees_root: Option<String>,
    pub default_branch: Option<String>,
    pub default_engine: Option<String>,
}

fn default_engine() -> String {
    "claude".to_string()
}
fn default_locale() -> String {
    "en-US".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_max_attachment_bytes() -> u64 {
    20 * 1024 * 1024
}
fn default_heartbeat_prompt() -> String {
    "Process the queued events, decide if the user should be notified, \
     otherwise reply HEARTBEAT_OK."
        .to_string()
}
fn default_dnd_start() -> String {
    "22:00".to_string()
}
fn default_dnd_end() -> String {
    "08:00".to_string()
}

impl BobConfig {
    /// Load config from `config_path`, falling back to `BOB_CONFIG` env var,
    /// falling back to `~/.bob/config.toml`. `BOB_*` env vars (e.g.
    /// `BOB_TELEGRAM_TOKEN`) override file values, matching spec.md §6's
    /// environment inputs list.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("BOB_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: BobConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BOB_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        if config.telegram.token.trim().is_empty() {
            return Err(CoreError::Config(
                "telegram.token is required (set [telegram] token = ... or BOB_TELEGRAM_TOKEN)"
                    .to_string(),
            ));
        }

        Ok(config)
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        bob_root().join("data")
    }

    pub fn memory_dir(&self) -> std::path::PathBuf {
        bob_root().join("memory")
    }
}

/// Fixed user root for all persistent state (spec.md §6).
pub fn bob_root() -> std::path::PathBuf {
    if let Ok(root) = std::env::var("BOB_HOME") {
        return std::path::PathBuf::from(root);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    std::path::PathBuf::from(home).join(".bob")
}

fn default_config_path() -> String {
    bob_root()
        .join("config.toml")
        .to_string_lossy()
        .into_owned()
}
