use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ReplyError>;
