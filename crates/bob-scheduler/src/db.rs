use rusqlite::Connection;

use crate::error::Result;

/// Open (creating if needed) `data/jobs.db` and initialize the `jobs` table
/// (spec.md §3, §6).
pub fn open_jobs_db(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id             TEXT    NOT NULL PRIMARY KEY,
            bob_id         TEXT    NOT NULL DEFAULT 'bob',
            chat_id        INTEGER NOT NULL,
            thread_id      INTEGER,
            schedule_kind  TEXT    NOT NULL,
            schedule_spec  TEXT    NOT NULL,
            job_type       TEXT    NOT NULL,
            payload        TEXT    NOT NULL,
            enabled        INTEGER NOT NULL DEFAULT 1,
            next_run_at    TEXT,
            last_run_at    TEXT,
            context_mode   TEXT    NOT NULL DEFAULT 'session',
            created_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_next_run
            ON jobs (next_run_at) WHERE enabled = 1;
        CREATE INDEX IF NOT EXISTS idx_jobs_chat ON jobs (chat_id);
        ",
    )?;
    Ok(conn)
}

/// Open (creating if needed) `data/events.db` and initialize the `events`
/// table (spec.md §3, §4.2).
pub fn open_events_db(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id           INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            bob_id       TEXT    NOT NULL DEFAULT 'bob',
            chat_id      INTEGER NOT NULL,
            thread_id    INTEGER,
            kind         TEXT    NOT NULL,
            payload      TEXT    NOT NULL DEFAULT '{}',
            created_at   TEXT    NOT NULL,
            claimed_at   TEXT,
            claim_token  TEXT,
            processed_at TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_events_pending
            ON events (processed_at, claimed_at);
        CREATE INDEX IF NOT EXISTS idx_events_claim_token ON events (claim_token);
        CREATE INDEX IF NOT EXISTS idx_events_chat ON events (chat_id, thread_id, created_at);
        ",
    )?;
    Ok(conn)
}
