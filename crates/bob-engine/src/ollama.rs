//! Local Ollama engine: non-streaming fallback wrapped to satisfy the
//! `Engine` trait's `on_delta` contract by emitting the whole reply as one
//! delta (spec.md §4.7: "`OllamaEngine` (local, non-streaming fallback...)").

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::types::{DeltaSink, EngineOutcome, EngineRequest};

const DEFAULT_MODEL: &str = "llama3.2";

pub struct OllamaEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEngine {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl Engine for OllamaEngine {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn run(&self, req: EngineRequest, on_delta: DeltaSink) -> Result<EngineOutcome> {
        let url = format!("{}/api/chat", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": req.prompt}],
            "stream": false,
        });

        debug!(model = %self.model, "sending request to Ollama");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    EngineError::Unavailable(e.to_string())
                } else {
                    EngineError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(EngineError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        let final_text = api_resp.message.content;
        on_delta(&final_text);

        Ok(EngineOutcome {
            final_text,
            actions: Vec::new(),
            session_token: None,
        })
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}
