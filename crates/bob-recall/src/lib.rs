pub mod chunker;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod manager;
pub mod search;
pub mod types;

pub use embeddings::{EmbeddingProvider, OllamaEmbeddingProvider};
pub use error::{RecallError, Result};
pub use manager::{fingerprint, RecallIndex};
pub use types::{Chunk, MatchType, NewChunk, SearchHit, SearchMode, SourceRecord};
