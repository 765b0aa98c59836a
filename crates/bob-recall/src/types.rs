use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A heading-bounded chunk of a markdown source (spec.md §3/§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    /// Content tag, e.g. `"journal:2026/02-03"` — derived from the source
    /// file's path relative to the indexed root.
    pub source: String,
    /// The section's heading, suffixed `(cont.)` for overlap continuations.
    pub title: String,
    /// Ordered heading trail down to `title` (outermost first).
    pub breadcrumbs: Vec<String>,
    pub content: String,
    pub preview: String,
    pub line_start: u32,
    pub line_end: u32,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A chunk awaiting insertion, before an id has been assigned.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub source: String,
    pub title: String,
    pub breadcrumbs: Vec<String>,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub token_count: u32,
}

/// `sources` sidecar row: the content fingerprint a source was last indexed
/// at (spec.md §3/§4.9's "reindexing a source is atomic").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: String,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

/// Which retrieval path(s) produced a given hit (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Fts,
    Vector,
    Hybrid,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: i64,
    pub source: String,
    pub title: String,
    pub breadcrumbs: Vec<String>,
    pub preview: String,
    /// Higher is better, regardless of the underlying path's native scale
    /// (BM25 is negated before this point; RRF scores are summed directly).
    pub score: f64,
    pub match_type: MatchType,
}

/// Which retrieval path(s) to use for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Fts,
    Vector,
    Hybrid,
}
