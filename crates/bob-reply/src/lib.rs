pub mod chunker;
pub mod coordinator;
pub mod directives;
pub mod error;
pub mod sanitize;
pub mod transport;

pub use coordinator::{ReplyConfig, ReplyOutcome, StreamCoordinator};
pub use directives::{parse_directives, ParsedDirectives, StreamMode};
pub use error::{ReplyError, Result};
pub use transport::{render, EditOutcome, MessageId, RenderedText, ReplyTransport};
