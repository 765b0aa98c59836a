//! Strips reasoning wrappers the model may leave in visible text
//! (spec.md §4.8 step 3).

const WRAPPER_TAGS: &[&str] = &["thinking", "reasoning", "reflection"];

pub fn strip_reasoning_wrappers(text: &str) -> String {
    let mut out = text.to_string();
    for tag in WRAPPER_TAGS {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        loop {
            let Some(start) = out.find(&open) else { break };
            let Some(end_rel) = out[start..].find(&close) else {
                // Unclosed wrapper: drop everything from the opening tag.
                out.truncate(start);
                break;
            };
            let end = start + end_rel + close.len();
            out.replace_range(start..end, "");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_closed_thinking_block() {
        let text = "before <thinking>internal reasoning</thinking> after";
        assert_eq!(strip_reasoning_wrappers(text), "before  after");
    }

    #[test]
    fn drops_trailing_unclosed_block() {
        let text = "visible text <thinking>still going";
        assert_eq!(strip_reasoning_wrappers(text), "visible text ");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_reasoning_wrappers("nothing to strip"), "nothing to strip");
    }
}
