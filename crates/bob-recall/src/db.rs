//! SQLite schema for the recall index (spec.md §3, §6: `data/bob.db`).
//!
//! `chunks` is authoritative. `embeddings` holds the raw float32 BLOB per
//! chunk — also authoritative. `chunks_vec` is an optional `sqlite-vec`
//! virtual table used as an ANN cache; it's reconstructed lazily (never
//! treated as a second source of truth) when its row count diverges from
//! `embeddings`' (spec.md §4.9, §9).

use rusqlite::Connection;
use tracing::warn;

use crate::error::Result;

/// Embedding dimensionality. Fixed so `chunks_vec`'s `vec0(embedding float[D])`
/// declaration and the raw BLOB layout agree.
pub const EMBEDDING_DIM: usize = 768;

pub fn open_recall_db(path: &std::path::Path) -> Result<Connection> {
    // Registers the `sqlite-vec` loadable extension as an auto-extension so
    // every connection opened afterwards (including `:memory:` ones in
    // tests) gains `vec0` support. Safe to call more than once.
    unsafe {
        let init_fn = sqlite_vec::sqlite3_vec_init as *const ();
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(init_fn)));
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chunks (
            id            INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            bob_id        TEXT    NOT NULL DEFAULT 'bob',
            source        TEXT    NOT NULL,
            title         TEXT    NOT NULL,
            breadcrumbs   TEXT    NOT NULL,
            content       TEXT    NOT NULL,
            preview       TEXT    NOT NULL,
            line_start    INTEGER NOT NULL,
            line_end      INTEGER NOT NULL,
            token_count   INTEGER NOT NULL,
            created_at    TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks (source);

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            source, title, content,
            content = 'chunks', content_rowid = 'id'
        );

        CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, source, title, content)
            VALUES (new.id, new.source, new.title, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, source, title, content)
            VALUES ('delete', old.id, old.source, old.title, old.content);
        END;

        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id  INTEGER NOT NULL PRIMARY KEY,
            vector    BLOB    NOT NULL,
            dim       INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS sources (
            source      TEXT NOT NULL PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        ) STRICT;
        ",
    )?;

    if let Err(e) = conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0(embedding float[{EMBEDDING_DIM}]);"
    )) {
        warn!(error = %e, "sqlite-vec extension unavailable; vector search will brute-force over embeddings");
    }

    Ok(conn)
}

/// Whether the `chunks_vec` virtual table exists in this connection (it may
/// not, if the extension failed to load).
pub fn has_vec_table(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'chunks_vec'",
        [],
        |_| Ok(()),
    )
    .is_ok()
}
