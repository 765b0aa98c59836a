use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecallError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding provider error: {0}")]
    Embedding(String),
}

pub type Result<T> = std::result::Result<T, RecallError>;
