pub mod atomic;
pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::{ChatId, ThreadId, BOB_ID, SYSTEM_CHAT_ID};
