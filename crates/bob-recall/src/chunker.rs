//! Markdown chunking (spec.md §4.9): parse by headings into breadcrumb-bearing
//! sections, then split any section over the token budget into overlapping
//! sub-chunks.

use crate::types::NewChunk;

const TOKEN_SOFT_CAP: u32 = 500;
const OVERLAP_TOKENS: u32 = 40;
const MIN_TRAILING_TOKENS: u32 = 50;
/// `token ≈ ⌈chars/4⌉` (spec.md §4.9).
const CHARS_PER_TOKEN: usize = 4;

fn token_count(s: &str) -> u32 {
    ((s.chars().count() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN) as u32
}

struct RawSection {
    breadcrumbs: Vec<String>,
    title: String,
    content: String,
    line_start: u32,
    line_end: u32,
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_end();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = trimmed[hashes..].trim();
    if rest.is_empty() || !trimmed[hashes..].starts_with(' ') {
        return None;
    }
    Some((hashes, rest))
}

/// Walk `content` line by line, maintaining a heading-level stack so each
/// emitted section carries its breadcrumb trail (outermost heading first,
/// the section's own title last).
fn sections(source: &str, content: &str) -> Vec<RawSection> {
    let lines: Vec<&str> = content.lines().collect();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut out = Vec::new();

    let mut cur_title = source.to_string();
    let mut cur_breadcrumbs: Vec<String> = Vec::new();
    let mut cur_lines: Vec<&str> = Vec::new();
    let mut cur_start: u32 = 1;

    for (idx, line) in lines.iter().enumerate() {
        let lineno = (idx + 1) as u32;
        if let Some((level, title)) = heading_level(line) {
            if !cur_lines.is_empty() || !cur_breadcrumbs.is_empty() || cur_title != source {
                out.push(RawSection {
                    breadcrumbs: cur_breadcrumbs.clone(),
                    title: cur_title.clone(),
                    content: cur_lines.join("\n"),
                    line_start: cur_start,
                    line_end: lineno.saturating_sub(1).max(cur_start),
                });
            } else if !cur_lines.is_empty() {
                out.push(RawSection {
                    breadcrumbs: Vec::new(),
                    title: cur_title.clone(),
                    content: cur_lines.join("\n"),
                    line_start: cur_start,
                    line_end: lineno.saturating_sub(1).max(cur_start),
                });
            }

            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, title.to_string()));

            cur_breadcrumbs = stack.iter().map(|(_, t)| t.clone()).collect();
            cur_title = title.to_string();
            cur_lines = Vec::new();
            cur_start = lineno;
        } else {
            cur_lines.push(line);
        }
    }

    let last_line = lines.len() as u32;
    if !cur_lines.is_empty() {
        out.push(RawSection {
            breadcrumbs: cur_breadcrumbs,
            title: cur_title,
            content: cur_lines.join("\n"),
            line_start: cur_start,
            line_end: last_line.max(cur_start),
        });
    }

    out.into_iter().filter(|s| !s.content.trim().is_empty()).collect()
}

/// Split one section's content into token-budget sub-chunks with overlap,
/// dropping (merging into the prior sub-chunk) any trailing remainder
/// smaller than [`MIN_TRAILING_TOKENS`].
fn split_section(section: RawSection, source: &str) -> Vec<NewChunk> {
    let total_tokens = token_count(&section.content);
    if total_tokens <= TOKEN_SOFT_CAP {
        return vec![NewChunk {
            source: source.to_string(),
            title: section.title,
            breadcrumbs: section.breadcrumbs,
            content: section.content.clone(),
            line_start: section.line_start,
            line_end: section.line_end,
            token_count: total_tokens,
        }];
    }

    let cap_chars = TOKEN_SOFT_CAP as usize * CHARS_PER_TOKEN;
    let overlap_chars = OVERLAP_TOKENS as usize * CHARS_PER_TOKEN;
    let step = cap_chars.saturating_sub(overlap_chars).max(1);

    let chars: Vec<char> = section.content.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut part = 0usize;

    while start < chars.len() {
        let end = (start + cap_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece_tokens = token_count(&piece);

        if part > 0 && piece_tokens < MIN_TRAILING_TOKENS {
            if let Some(prev) = chunks.last_mut() {
                let prev: &mut NewChunk = prev;
                prev.content.push_str(&piece);
                prev.token_count = token_count(&prev.content);
            }
            break;
        }

        let title = if part == 0 {
            section.title.clone()
        } else {
            format!("{} (cont.)", section.title)
        };

        let prefix_lines = chars[..start].iter().filter(|&&c| c == '\n').count() as u32;
        let piece_lines = piece.matches('\n').count() as u32;
        let line_start = section.line_start + prefix_lines;

        chunks.push(NewChunk {
            source: source.to_string(),
            title,
            breadcrumbs: section.breadcrumbs.clone(),
            content: piece,
            line_start,
            line_end: line_start + piece_lines,
            token_count: piece_tokens,
        });

        if end >= chars.len() {
            break;
        }
        start += step;
        part += 1;
    }

    chunks
}

/// Chunk a whole markdown document into [`NewChunk`]s ready for insertion.
pub fn chunk_markdown(source: &str, content: &str) -> Vec<NewChunk> {
    sections(source, content)
        .into_iter()
        .flat_map(|s| split_section(s, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_heading_section() {
        let md = "# Title\n\nSome body text.\n";
        let chunks = chunk_markdown("test", md);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "Title");
        assert!(chunks[0].content.contains("Some body text."));
    }

    #[test]
    fn nested_headings_carry_breadcrumbs() {
        let md = "# A\n\nintro\n\n## B\n\nbody b\n\n### C\n\nbody c\n";
        let chunks = chunk_markdown("test", md);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].breadcrumbs, vec!["A".to_string()]);
        assert_eq!(chunks[1].breadcrumbs, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            chunks[2].breadcrumbs,
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn sibling_headings_reset_breadcrumbs() {
        let md = "# A\n\n## B\n\nbody b\n\n## C\n\nbody c\n";
        let chunks = chunk_markdown("test", md);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].breadcrumbs, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(chunks[1].breadcrumbs, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn oversized_section_splits_with_overlap_and_cont_suffix() {
        let body = "word ".repeat(4000); // ~20000 chars, well over the 2000-char cap
        let md = format!("# Big\n\n{body}\n");
        let chunks = chunk_markdown("test", &md);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].title, "Big");
        assert!(chunks[1].title.ends_with("(cont.)"));
        for c in &chunks {
            assert!(c.token_count <= 500 + 10);
        }
    }

    #[test]
    fn preamble_before_first_heading_is_its_own_chunk() {
        let md = "intro text before any heading\n\n# First\n\nbody\n";
        let chunks = chunk_markdown("journal:2026-02-03", md);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].title, "journal:2026-02-03");
        assert!(chunks[0].breadcrumbs.is_empty());
    }
}
