//! Incremental indexing and unified search entry point (spec.md §3, §4.9).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chunker::chunk_markdown;
use crate::db::{has_vec_table, open_recall_db};
use crate::embeddings::{vector_to_bytes, EmbeddingProvider};
use crate::error::Result;
use crate::search::{fts_search, reciprocal_rank_fusion, vector_search};
use crate::types::{NewChunk, SearchHit, SearchMode};

const PREVIEW_CHARS: usize = 200;

pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

/// Owns the recall database connection and (optionally) an embedding
/// provider. A source is only reindexed when its content fingerprint
/// changes, and reindexing a source is atomic: the old chunks are deleted
/// and the new ones inserted inside one transaction.
pub struct RecallIndex {
    conn: Mutex<Connection>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl RecallIndex {
    pub fn open(path: &Path, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let conn = open_recall_db(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Walk `root` for `.md` files and index each one whose fingerprint has
    /// changed since the last pass. Returns the sources actually reindexed.
    pub async fn index_all(&self, root: &Path) -> Result<Vec<String>> {
        let mut reindexed = Vec::new();
        for path in markdown_files(root) {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let source = source_tag(root, &path);
            if self.index_source(&source, &content).await? {
                reindexed.push(source);
            }
        }
        Ok(reindexed)
    }

    /// Reindex a single source if its fingerprint differs from what's
    /// stored. Returns whether it was actually reindexed.
    pub async fn index_source(&self, source: &str, content: &str) -> Result<bool> {
        let fp = fingerprint(content);
        let conn = self.conn.lock().await;

        let current: Option<String> = conn
            .query_row(
                "SELECT fingerprint FROM sources WHERE source = ?1",
                params![source],
                |r| r.get(0),
            )
            .ok();
        if current.as_deref() == Some(fp.as_str()) {
            return Ok(false);
        }
        drop(conn);

        let chunks = chunk_markdown(source, content);
        let embeddings = if let Some(embedder) = &self.embedder {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            embedder.embed_batch(&texts).await
        } else {
            vec![None; chunks.len()]
        };

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let vec_table = has_vec_table(&tx);

        tx.execute(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?1)",
            params![source],
        )?;
        if vec_table {
            tx.execute(
                "DELETE FROM chunks_vec WHERE rowid IN (SELECT id FROM chunks WHERE source = ?1)",
                params![source],
            )?;
        }
        tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;

        for (chunk, vector) in chunks.iter().zip(embeddings.into_iter()) {
            let id = insert_chunk(&tx, chunk)?;
            if let Some(vector) = vector {
                let bytes = vector_to_bytes(&vector);
                tx.execute(
                    "INSERT INTO embeddings (chunk_id, vector, dim) VALUES (?1, ?2, ?3)
                     ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector, dim = excluded.dim",
                    params![id, bytes, vector.len() as i64],
                )?;
                if vec_table {
                    tx.execute(
                        "INSERT INTO chunks_vec (rowid, embedding) VALUES (?1, ?2)",
                        params![id, bytes],
                    )?;
                }
            }
        }

        tx.execute(
            "INSERT INTO sources (source, fingerprint, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET fingerprint = excluded.fingerprint, updated_at = excluded.updated_at",
            params![source, fp, Utc::now().to_rfc3339()],
        )?;

        if vec_table {
            backfill_vec_table_if_diverged(&tx)?;
        }

        tx.commit()?;

        info!(source, chunk_count = chunks.len(), "reindexed source");
        Ok(true)
    }

    /// Unified search entry point: FTS-only, vector-only, or hybrid RRF
    /// fusion of both, depending on `mode` and whether an embedder is wired.
    pub async fn search(&self, query: &str, k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock().await;

        let want_fts = matches!(mode, SearchMode::Fts | SearchMode::Hybrid);
        let want_vector = matches!(mode, SearchMode::Vector | SearchMode::Hybrid) && self.embedder.is_some();

        let fts_hits = if want_fts { fts_search(&conn, query, k * 2)? } else { Vec::new() };

        let vector_hits = if want_vector {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(query).await? {
                    Some(qvec) => vector_search(&conn, &qvec, k * 2)?,
                    None => Vec::new(),
                }
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        let hits = match mode {
            SearchMode::Fts => fts_hits,
            SearchMode::Vector => vector_hits,
            SearchMode::Hybrid => reciprocal_rank_fusion(&[fts_hits, vector_hits], k),
        };
        Ok(hits.into_iter().take(k).collect())
    }
}

/// `chunks_vec` is a cache over `embeddings`, not a second source of truth
/// (db.rs module doc). If its row count has drifted from `embeddings`' —
/// e.g. the extension was unavailable on an earlier run and embeddings were
/// written without a matching vec row — rebuild it from scratch.
fn backfill_vec_table_if_diverged(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let embeddings_count: i64 = tx.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;
    let vec_count: i64 = tx.query_row("SELECT COUNT(*) FROM chunks_vec", [], |r| r.get(0))?;
    if embeddings_count == vec_count {
        return Ok(());
    }

    info!(embeddings_count, vec_count, "chunks_vec diverged from embeddings, backfilling");
    tx.execute("DELETE FROM chunks_vec", [])?;
    tx.execute(
        "INSERT INTO chunks_vec (rowid, embedding) SELECT chunk_id, vector FROM embeddings",
        [],
    )?;
    Ok(())
}

fn insert_chunk(tx: &rusqlite::Transaction<'_>, chunk: &NewChunk) -> Result<i64> {
    let breadcrumbs = serde_json::to_string(&chunk.breadcrumbs)?;
    let preview: String = chunk.content.chars().take(PREVIEW_CHARS).collect();
    tx.execute(
        "INSERT INTO chunks (source, title, breadcrumbs, content, preview, line_start, line_end, token_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            chunk.source,
            chunk.title,
            breadcrumbs,
            chunk.content,
            preview,
            chunk.line_start,
            chunk.line_end,
            chunk.token_count,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn source_tag(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .with_extension("")
        .to_string_lossy()
        .replace('\\', "/")
}

fn markdown_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
            // Deterministic toy embedding: koala/marsupial queries cluster together.
            let v = if text.to_lowercase().contains("koala") || text.to_lowercase().contains("marsupial") {
                vec![1.0, 0.0, 0.0]
            } else {
                vec![0.0, 1.0, 0.0]
            };
            Ok(Some(v))
        }
    }

    #[tokio::test]
    async fn reindexing_unchanged_content_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let index = RecallIndex::open(&dir.path().join("bob.db"), None).unwrap();
        let content = "# Title\n\nbody\n";
        assert!(index.index_source("doc", content).await.unwrap());
        assert!(!index.index_source("doc", content).await.unwrap());
    }

    #[tokio::test]
    async fn changed_content_reindexes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let index = RecallIndex::open(&dir.path().join("bob.db"), None).unwrap();
        index.index_source("doc", "# A\n\nfirst\n").await.unwrap();
        index.index_source("doc", "# B\n\nsecond\n").await.unwrap();

        let hits = index.search("second", 10, SearchMode::Fts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "B");
    }

    #[tokio::test]
    async fn hybrid_search_fuses_fts_and_vector_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
        let index = RecallIndex::open(&dir.path().join("bob.db"), Some(embedder)).unwrap();

        index
            .index_source("journal:koala", "# Koala facts\n\nThe koala is a marsupial.\n")
            .await
            .unwrap();
        index
            .index_source("journal:unrelated", "# Weather\n\nIt rained today.\n")
            .await
            .unwrap();

        let hits = index.search("koala marsupial", 5, SearchMode::Hybrid).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "journal:koala");
    }
}
