//! Splits cleaned reply text on paragraph boundaries with a target maximum
//! size (spec.md §4.8: "≈3500 graphemes").

use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_MAX_GRAPHEMES: usize = 3500;

/// Split `text` into chunks no larger than `max_graphemes`, preferring to
/// break on blank-line paragraph boundaries. A single paragraph longer than
/// the limit is hard-split at the grapheme boundary.
pub fn split_into_chunks(text: &str, max_graphemes: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let paragraphs: Vec<&str> = split_paragraphs(text);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for para in paragraphs {
        let para_len = para.graphemes(true).count();

        if para_len > max_graphemes {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(hard_split(para, max_graphemes));
            continue;
        }

        let joiner_len = if current.is_empty() { 0 } else { 2 };
        if current_len + joiner_len + para_len > max_graphemes {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
            current_len += 2;
        }
        current.push_str(para);
        current_len += para_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n").filter(|p| !p.is_empty()).collect()
}

fn hard_split(text: &str, max_graphemes: usize) -> Vec<String> {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    graphemes
        .chunks(max_graphemes)
        .map(|c| c.concat())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_short_paragraph_is_one_chunk() {
        let chunks = split_into_chunks("hello world", 3500);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn splits_on_paragraph_boundary_when_over_limit() {
        let para_a = "a".repeat(2000);
        let para_b = "b".repeat(2000);
        let text = format!("{para_a}\n\n{para_b}");
        let chunks = split_into_chunks(&text, 3500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], para_a);
        assert_eq!(chunks[1], para_b);
    }

    #[test]
    fn hard_splits_an_oversized_single_paragraph() {
        let para = "x".repeat(9000);
        let chunks = split_into_chunks(&para, 3500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3500);
    }
}
