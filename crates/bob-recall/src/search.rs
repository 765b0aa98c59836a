//! Hybrid lexical + vector search (spec.md §4.9).
//!
//! FTS5 gives a BM25-ranked candidate list (negated so higher is better).
//! Vector search goes through `chunks_vec` when it's present and in sync,
//! falling back to a brute-force cosine scan over `embeddings` otherwise —
//! `chunks_vec` is a cache, never a second source of truth. The two ranked
//! lists are fused with Reciprocal Rank Fusion (`k = 60`).

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::db::has_vec_table;
use crate::embeddings::{bytes_to_vector, cosine_similarity};
use crate::error::Result;
use crate::types::{MatchType, SearchHit};

const RRF_K: f64 = 60.0;

fn sanitize_fts_query(query: &str) -> String {
    // FTS5 MATCH treats `"`, `-`, `(`, `)`, `*`, `:` as syntax. Quote each
    // token individually so raw user queries can't break the statement.
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_to_hit(
    chunk_id: i64,
    source: String,
    title: String,
    breadcrumbs: String,
    preview: String,
    score: f64,
    match_type: MatchType,
) -> SearchHit {
    let breadcrumbs: Vec<String> = serde_json::from_str(&breadcrumbs).unwrap_or_default();
    SearchHit {
        chunk_id,
        source,
        title,
        breadcrumbs,
        preview,
        score,
        match_type,
    }
}

/// Full-text search, ranked by negated BM25 (so higher is better, matching
/// [`SearchHit::score`]'s convention).
pub fn fts_search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let sanitized = sanitize_fts_query(query);
    if sanitized.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT c.id, c.source, c.title, c.breadcrumbs, c.preview, bm25(chunks_fts) AS rank
         FROM chunks_fts
         JOIN chunks c ON c.id = chunks_fts.rowid
         WHERE chunks_fts MATCH ?1
         ORDER BY rank ASC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, f64>(5)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (id, source, title, breadcrumbs, preview, bm25) = row?;
        hits.push(row_to_hit(id, source, title, breadcrumbs, preview, -bm25, MatchType::Fts));
    }
    Ok(hits)
}

/// Vector search against the query embedding. Uses `chunks_vec`'s ANN index
/// when present, widening the candidate set to `3 * limit` before resolving
/// metadata in a second query; falls back to brute-force cosine over
/// `embeddings` when the cache is absent.
pub fn vector_search(conn: &Connection, query_vec: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
    if has_vec_table(conn) {
        match vector_search_via_vec0(conn, query_vec, limit) {
            Ok(hits) if !hits.is_empty() => return Ok(hits),
            Ok(_) => {}
            Err(_) => {}
        }
    }
    vector_search_brute_force(conn, query_vec, limit)
}

fn vector_search_via_vec0(conn: &Connection, query_vec: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
    let bytes = crate::embeddings::vector_to_bytes(query_vec);
    let candidate_limit = (limit * 3).max(limit);

    let mut stmt = conn.prepare(
        "SELECT rowid, distance FROM chunks_vec
         WHERE embedding MATCH ?1 AND k = ?2
         ORDER BY distance ASC",
    )?;
    let candidates: Vec<(i64, f64)> = stmt
        .query_map(params![bytes, candidate_limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut hits = Vec::with_capacity(candidates.len());
    for (chunk_id, distance) in candidates {
        let row = conn.query_row(
            "SELECT source, title, breadcrumbs, preview FROM chunks WHERE id = ?1",
            params![chunk_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        );
        if let Ok((source, title, breadcrumbs, preview)) = row {
            // vec0's distance is L2-ish; invert so higher means closer.
            hits.push(row_to_hit(chunk_id, source, title, breadcrumbs, preview, -distance, MatchType::Vector));
        }
    }
    hits.truncate(limit);
    Ok(hits)
}

fn vector_search_brute_force(conn: &Connection, query_vec: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.source, c.title, c.breadcrumbs, c.preview, e.vector
         FROM embeddings e
         JOIN chunks c ON c.id = e.chunk_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Vec<u8>>(5)?,
        ))
    })?;

    let mut scored: Vec<(f64, SearchHit)> = Vec::new();
    for row in rows {
        let (id, source, title, breadcrumbs, preview, raw) = row?;
        let vec = bytes_to_vector(&raw);
        let sim = cosine_similarity(query_vec, &vec);
        scored.push((sim, row_to_hit(id, source, title, breadcrumbs, preview, sim, MatchType::Vector)));
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().take(limit).map(|(_, h)| h).collect())
}

/// Reciprocal Rank Fusion over two already-ranked lists: `score = Σ 1/(k + rank + 1)`
/// per list a chunk appears in, summed across lists (`k = 60`).
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchHit>], limit: usize) -> Vec<SearchHit> {
    let mut fused: HashMap<i64, (f64, SearchHit, bool, bool)> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f64 + 1.0);
            let is_vec = hit.match_type == MatchType::Vector;
            let entry = fused
                .entry(hit.chunk_id)
                .or_insert_with(|| (0.0, hit.clone(), false, false));
            entry.0 += contribution;
            if is_vec {
                entry.3 = true;
            } else {
                entry.2 = true;
            }
        }
    }

    let mut out: Vec<SearchHit> = fused
        .into_values()
        .map(|(score, mut hit, saw_fts, saw_vec)| {
            hit.score = score;
            hit.match_type = match (saw_fts, saw_vec) {
                (true, true) => MatchType::Hybrid,
                (true, false) => MatchType::Fts,
                (false, true) => MatchType::Vector,
                (false, false) => hit.match_type,
            };
            hit
        })
        .collect();

    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(limit);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, match_type: MatchType) -> SearchHit {
        SearchHit {
            chunk_id: id,
            source: "s".into(),
            title: "t".into(),
            breadcrumbs: vec![],
            preview: "p".into(),
            score: 0.0,
            match_type,
        }
    }

    #[test]
    fn fusion_prefers_chunks_ranked_highly_in_both_lists() {
        // koala ranks #1 in FTS and #2 in vector; marsupial ranks #1 in vector only.
        let fts = vec![hit(1, MatchType::Fts), hit(2, MatchType::Fts)];
        let vector = vec![hit(3, MatchType::Vector), hit(1, MatchType::Vector)];

        let fused = reciprocal_rank_fusion(&[fts, vector], 10);
        assert_eq!(fused[0].chunk_id, 1);
        assert_eq!(fused[0].match_type, MatchType::Hybrid);
    }

    #[test]
    fn fusion_respects_limit() {
        let fts: Vec<SearchHit> = (0..20).map(|i| hit(i, MatchType::Fts)).collect();
        let fused = reciprocal_rank_fusion(&[fts], 5);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn sanitizer_quotes_tokens() {
        assert_eq!(sanitize_fts_query("foo bar"), "\"foo\" \"bar\"");
        assert_eq!(sanitize_fts_query("a\"b"), "\"a\"\"b\"");
    }
}
