use rusqlite::Connection;

use crate::error::Result;

/// Open (creating if needed) `data/messages.db` and initialize the
/// append-only `messages` table (spec.md §3: "Message").
pub fn open_messages_db(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            bob_id      TEXT    NOT NULL DEFAULT 'bob',
            chat_id     INTEGER NOT NULL,
            thread_id   INTEGER,
            message_id  INTEGER,
            role        TEXT    NOT NULL,
            text        TEXT    NOT NULL,
            created_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages (chat_id, thread_id, created_at);
        ",
    )?;
    Ok(conn)
}
