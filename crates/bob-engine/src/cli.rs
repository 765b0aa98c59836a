//! CLI-subprocess engine, generalized from the teacher's `claude -p` wrapper
//! to cover any of `/claude`, `/codex`, `/opencode`, `/pi` (spec.md §4.2): a
//! single `command` name plus per-engine permission flags read from
//! `[engines.<id>]` config. Claude Code's own MCP tool-bridge wiring is
//! engine-SDK-internal behavior spec.md places out of scope and is dropped.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::types::{DeltaSink, EngineOutcome, EngineRequest};

pub struct CliEngine {
    id: String,
    command: String,
}

impl CliEngine {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl Engine for CliEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, req: EngineRequest, on_delta: DeltaSink) -> Result<EngineOutcome> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if let Some(cwd) = &req.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(token) = &req.resume_token {
            cmd.arg("--resume").arg(token);
        }
        if req.flags.skip_permissions || req.flags.yolo {
            cmd.arg("--dangerously-skip-permissions");
        }
        for image in &req.images {
            if let Some(path) = save_image_to_tmp(image) {
                cmd.arg("--image").arg(path);
            }
        }

        debug!(command = %self.command, prompt_len = req.prompt.len(), "spawning CLI engine");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::Unavailable(format!(
                    "'{}' not found on PATH — install it first",
                    self.command
                ))
            } else {
                EngineError::Unavailable(format!("failed to spawn '{}': {e}", self.command))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(req.prompt.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Process {
                engine: self.id.clone(),
                status: output.status.code().unwrap_or(1),
                message: stderr.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let json: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| EngineError::Parse(format!("malformed CLI JSON: {e}")))?;

        if json.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
            let msg = json
                .get("result")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(EngineError::Process {
                engine: self.id.clone(),
                status: 1,
                message: msg,
            });
        }

        let final_text = json.get("result").and_then(|v| v.as_str()).unwrap_or("").to_string();
        on_delta(&final_text);

        let session_token = json
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(EngineOutcome {
            final_text,
            actions: Vec::new(),
            session_token,
        })
    }
}

fn save_image_to_tmp(image: &crate::types::ImageAttachment) -> Option<String> {
    let ext = match image.media_type.as_str() {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    };
    let id = uuid::Uuid::new_v4().simple();
    let path = format!("/tmp/bob-img-{id}.{ext}");
    std::fs::write(&path, image.bytes.as_slice()).ok()?;
    Some(path)
}
