use thiserror::Error;

/// Error kinds shared across the daemon, per spec.md §7's propagation
/// policy: every internal error carries a kind plus a human message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("path escapes allowed root: {0}")]
    PathEscape(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
