//! In-band directive parsing (spec.md §4.8, §6): `[[react: X]]`,
//! `[[stream: edit|append|off]]`, `[[reply_to: N]]`, `[[reply_to_current]]`,
//! `[tg:<tag>[:value]]` aliases, and the silent sentinels `NO_REPLY` /
//! `HEARTBEAT_OK`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Edit,
    Append,
    Off,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDirectives {
    pub react: Option<String>,
    pub stream_mode: Option<StreamMode>,
    pub reply_to: Option<i64>,
    pub reply_to_current: bool,
    pub tags: Vec<(String, Option<String>)>,
    pub silent: bool,
}

const SILENT_TOKENS: &[&str] = &["NO_REPLY", "HEARTBEAT_OK"];

/// Strip every recognized directive out of `buffer`, returning the
/// remaining visible text and what was parsed. Directive syntax never
/// nests and never spans a delta boundary oddly — each is matched as a
/// single bracketed run.
pub fn parse_directives(buffer: &str) -> (String, ParsedDirectives) {
    let mut parsed = ParsedDirectives::default();
    let mut visible = String::with_capacity(buffer.len());
    let bytes = buffer.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if buffer[i..].starts_with("[[") {
            if let Some(end) = buffer[i..].find("]]") {
                let inner = &buffer[i + 2..i + end];
                apply_double_bracket(inner.trim(), &mut parsed);
                i += end + 2;
                continue;
            }
        } else if buffer[i..].starts_with("[tg:") {
            if let Some(end) = buffer[i..].find(']') {
                let inner = &buffer[i + 4..i + end];
                apply_tg_tag(inner, &mut parsed);
                i += end + 1;
                continue;
            }
        }
        let ch = buffer[i..].chars().next().unwrap();
        visible.push(ch);
        i += ch.len_utf8();
    }

    if SILENT_TOKENS.iter().any(|t| visible.contains(t)) {
        parsed.silent = true;
    }

    (visible, parsed)
}

fn apply_double_bracket(inner: &str, parsed: &mut ParsedDirectives) {
    if inner.eq_ignore_ascii_case("reply_to_current") {
        parsed.reply_to_current = true;
        return;
    }
    let Some((key, value)) = inner.split_once(':') else { return };
    let key = key.trim().to_ascii_lowercase();
    let value = value.trim();
    match key.as_str() {
        "react" => parsed.react = Some(value.to_string()),
        "stream" => {
            parsed.stream_mode = match value.to_ascii_lowercase().as_str() {
                "edit" => Some(StreamMode::Edit),
                "append" => Some(StreamMode::Append),
                "off" => Some(StreamMode::Off),
                _ => None,
            }
        }
        "reply_to" => parsed.reply_to = value.parse().ok(),
        _ => {}
    }
}

fn apply_tg_tag(inner: &str, parsed: &mut ParsedDirectives) {
    match inner.split_once(':') {
        Some((tag, value)) => parsed.tags.push((tag.to_string(), Some(value.to_string()))),
        None => parsed.tags.push((inner.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_react_directive() {
        let (visible, parsed) = parse_directives("hello [[react: 👍]] world");
        assert_eq!(visible, "hello  world");
        assert_eq!(parsed.react.as_deref(), Some("👍"));
    }

    #[test]
    fn strips_stream_mode_directive() {
        let (visible, parsed) = parse_directives("[[stream: append]]hi");
        assert_eq!(visible, "hi");
        assert_eq!(parsed.stream_mode, Some(StreamMode::Append));
    }

    #[test]
    fn strips_reply_to_and_reply_to_current() {
        let (_, parsed) = parse_directives("[[reply_to: 42]]");
        assert_eq!(parsed.reply_to, Some(42));
        let (_, parsed) = parse_directives("[[reply_to_current]]");
        assert!(parsed.reply_to_current);
    }

    #[test]
    fn strips_tg_tag_aliases() {
        let (visible, parsed) = parse_directives("text [tg:spoiler] more [tg:lang:rust]");
        assert_eq!(visible, "text  more ");
        assert_eq!(parsed.tags[0], ("spoiler".to_string(), None));
        assert_eq!(parsed.tags[1], ("lang".to_string(), Some("rust".to_string())));
    }

    #[test]
    fn detects_silent_tokens() {
        let (_, parsed) = parse_directives("HEARTBEAT_OK");
        assert!(parsed.silent);
        let (_, parsed) = parse_directives("a normal reply");
        assert!(!parsed.silent);
    }
}
