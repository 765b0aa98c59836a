pub mod anthropic;
pub mod cli;
pub mod engine;
pub mod error;
pub mod ollama;
pub mod registry;
pub mod stream;
pub mod types;

pub use anthropic::AnthropicEngine;
pub use cli::CliEngine;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use ollama::OllamaEngine;
pub use registry::EngineRegistry;
pub use types::{
    ActionKind, DeltaSink, EngineAction, EngineFlags, EngineOutcome, EngineRequest,
    ImageAttachment,
};
