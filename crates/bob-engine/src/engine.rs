use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DeltaSink, EngineOutcome, EngineRequest};

/// A streaming token source (spec.md §1: engine SDKs are an external
/// collaborator, not something this crate re-implements). Concrete engines
/// wrap either a direct provider API ([`crate::anthropic::AnthropicEngine`]),
/// a local model server ([`crate::ollama::OllamaEngine`]), or a CLI agent
/// subprocess ([`crate::cli::CliEngine`]).
#[async_trait]
pub trait Engine: Send + Sync {
    /// Stable identifier matching a `[engines.<id>]` config section and the
    /// `/<id>` slash directive (e.g. `"claude"`, `"codex"`).
    fn id(&self) -> &str;

    async fn run(&self, req: EngineRequest, on_delta: DeltaSink) -> Result<EngineOutcome>;
}
