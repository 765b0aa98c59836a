//! Direct Anthropic Messages API engine, streaming via SSE (spec.md §4.7).
//!
//! Anthropic's API has no server-side session concept, so `session_token`
//! carries the serialized message history instead of an opaque handle —
//! decoded back into the request on the next turn and re-serialized
//! (including this turn) once the reply completes. A changed `cwd` still
//! invalidates it the same way a CLI engine's native resume id would
//! (`bob-sessions` drops all resume tokens on cwd change, regardless of
//! what they encode).

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};
use crate::types::{ActionKind, DeltaSink, EngineAction, EngineOutcome, EngineRequest};

const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat01-";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 8192;

pub struct AnthropicEngine {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    is_oauth: bool,
}

impl AnthropicEngine {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let is_oauth = api_key.starts_with(OAUTH_TOKEN_PREFIX);
        Self {
            client: reqwest::Client::new(),
            is_oauth,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.is_oauth {
            builder
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("anthropic-beta", OAUTH_BETA)
        } else {
            builder.header("x-api-key", &self.api_key)
        }
    }

    fn build_user_message(&self, req: &EngineRequest) -> serde_json::Value {
        if req.images.is_empty() {
            return serde_json::json!({"role": "user", "content": req.prompt});
        }

        let mut content: Vec<serde_json::Value> = req
            .images
            .iter()
            .map(|img| {
                serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": img.media_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(img.bytes.as_slice()),
                    }
                })
            })
            .collect();
        content.push(serde_json::json!({"type": "text", "text": req.prompt}));
        serde_json::json!({"role": "user", "content": content})
    }
}

#[async_trait]
impl Engine for AnthropicEngine {
    fn id(&self) -> &str {
        "claude-api"
    }

    async fn run(&self, req: EngineRequest, on_delta: DeltaSink) -> Result<EngineOutcome> {
        let mut history: Vec<serde_json::Value> = req
            .resume_token
            .as_deref()
            .and_then(|t| serde_json::from_str(t).ok())
            .unwrap_or_default();

        history.push(self.build_user_message(&req));

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": history,
            "stream": true,
        });

        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, "sending streaming request to Anthropic");

        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let resp = self.apply_auth(builder).send().await?;
        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(EngineError::RateLimited { retry_after_ms: retry });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(EngineError::Api { status, message: text });
        }

        let (final_text, actions) = process_stream(resp, &on_delta).await?;

        history.push(serde_json::json!({"role": "assistant", "content": final_text}));
        let session_token = serde_json::to_string(&history).ok();

        Ok(EngineOutcome {
            final_text,
            actions,
            session_token,
        })
    }
}

async fn process_stream(
    resp: reqwest::Response,
    on_delta: &DeltaSink,
) -> Result<(String, Vec<EngineAction>)> {
    let mut final_text = String::new();
    let mut actions = Vec::new();

    let mut current_event = String::new();
    let mut current_block_type = String::new();
    let mut tool_use_id = String::new();
    let mut tool_use_name = String::new();
    let mut tool_use_input_json = String::new();
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(EngineError::Http)?;
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(parsed) = parse_sse_line(line) else { continue };
            match parsed {
                SseParsed::Event(ev) => current_event = ev,
                SseParsed::Data(data) => {
                    if let Some(event) = parse_data_block(
                        &current_event,
                        &data,
                        &mut current_block_type,
                        &mut tool_use_id,
                        &mut tool_use_name,
                        &mut tool_use_input_json,
                    ) {
                        match event {
                            StreamEvent::TextDelta { text } => {
                                on_delta(&text);
                                final_text.push_str(&text);
                            }
                            StreamEvent::ToolUse { id: _, name, input } => {
                                actions.push(EngineAction {
                                    kind: ActionKind::Tool,
                                    name,
                                    detail: Some(input.to_string()),
                                });
                            }
                            StreamEvent::Error { message } => {
                                return Err(EngineError::Api { status: 0, message });
                            }
                            StreamEvent::Done { .. } => {}
                        }
                    }
                }
            }
        }
        line_buf = remainder;
    }

    Ok((final_text, actions))
}

fn parse_data_block(
    event_type: &str,
    data: &str,
    current_block_type: &mut String,
    tool_use_id: &mut String,
    tool_use_name: &mut String,
    tool_use_input_json: &mut String,
) -> Option<StreamEvent> {
    match event_type {
        "content_block_start" => {
            if let Ok(block_start) = serde_json::from_str::<ContentBlockStart>(data) {
                *current_block_type = block_start.content_block.block_type.clone();
                if block_start.content_block.block_type == "tool_use" {
                    *tool_use_id = block_start.content_block.id.unwrap_or_default();
                    *tool_use_name = block_start.content_block.name.unwrap_or_default();
                    tool_use_input_json.clear();
                }
            }
            None
        }
        "content_block_delta" => {
            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                match delta.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = delta.delta.text {
                            return Some(StreamEvent::TextDelta { text });
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            tool_use_input_json.push_str(&partial);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        "content_block_stop" => {
            if current_block_type == "tool_use" {
                let input = serde_json::from_str::<serde_json::Value>(tool_use_input_json.as_str())
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                let event = StreamEvent::ToolUse {
                    id: std::mem::take(tool_use_id),
                    name: std::mem::take(tool_use_name),
                    input,
                };
                tool_use_input_json.clear();
                current_block_type.clear();
                return Some(event);
            }
            current_block_type.clear();
            None
        }
        "error" => Some(StreamEvent::Error { message: data.to_string() }),
        _ => None,
    }
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}
