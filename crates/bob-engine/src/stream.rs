/// Incremental events parsed out of an Anthropic SSE response, before
/// they've been folded into an [`crate::types::EngineOutcome`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
        stop_reason: String,
    },
    Error { message: String },
}

/// Parse a single SSE line. SSE format: `event: <type>` / `data: <json>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        assert!(matches!(parse_sse_line("event: message_start"), Some(SseParsed::Event(e)) if e == "message_start"));
        assert!(matches!(parse_sse_line("data: {}"), Some(SseParsed::Data(d)) if d == "{}"));
        assert!(parse_sse_line("").is_none());
    }
}
