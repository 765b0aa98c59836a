//! Append-only message log (spec.md §3: "Message") — one row per inbound
//! user message and per fully-sent assistant reply, used to assemble
//! "recent context" windows and pruned by age. Mirrors the
//! `bob-scheduler::jobs::JobStore` narrow-data-access-layer pattern.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::{Message, NewMessage, Role};

pub struct MessageLog {
    conn: Mutex<Connection>,
    /// Last `createdAt` stamped per `(chatId, threadId)` key, so concurrent
    /// appends within the same millisecond still sort monotonically
    /// (spec.md §3 invariant: "createdAt monotonic per (chatId, threadId)
    /// within a single writer").
    last_stamp: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MessageLog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            last_stamp: Mutex::new(HashMap::new()),
        }
    }

    pub fn append(&self, input: NewMessage, now: DateTime<Utc>) -> Result<Message> {
        let key = format!("{}:{}", input.chat_id, input.thread_id.unwrap_or(0));
        let created_at = {
            let mut stamps = self.last_stamp.lock().unwrap();
            let stamped = match stamps.get(&key) {
                Some(prev) if *prev >= now => *prev + Duration::milliseconds(1),
                _ => now,
            };
            stamps.insert(key, stamped);
            stamped
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (chat_id, thread_id, message_id, role, text, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                input.chat_id,
                input.thread_id,
                input.message_id,
                input.role.to_string(),
                input.text,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Message {
            id,
            chat_id: input.chat_id,
            thread_id: input.thread_id,
            message_id: input.message_id,
            role: input.role,
            text: input.text,
            created_at,
        })
    }

    /// The most recent `limit` messages for `(chatId, threadId)`, oldest
    /// first — ready to feed straight into a "recent context" prompt.
    pub fn recent(&self, chat_id: i64, thread_id: Option<i64>, limit: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, thread_id, message_id, role, text, created_at
             FROM messages
             WHERE chat_id = ?1 AND thread_id IS ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![chat_id, thread_id, limit], row_to_message)?;
        let mut out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }

    /// Delete every row older than `cutoff` (retention policy, spec.md §3).
    /// Returns the number of rows removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM messages WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    /// Delete every row for `(chatId, threadId)` (e.g. `/clear`).
    pub fn clear_chat(&self, chat_id: i64, thread_id: Option<i64>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND thread_id IS ?2",
            params![chat_id, thread_id],
        )?;
        Ok(n)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        thread_id: row.get(2)?,
        message_id: row.get(3)?,
        role: role.parse::<Role>().unwrap_or(Role::User),
        text: row.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_messages_db;

    fn log() -> MessageLog {
        MessageLog::new(open_messages_db(std::path::Path::new(":memory:")).unwrap())
    }

    fn msg(chat_id: i64, text: &str) -> NewMessage {
        NewMessage {
            chat_id,
            thread_id: None,
            message_id: None,
            role: Role::User,
            text: text.to_string(),
        }
    }

    #[test]
    fn recent_returns_oldest_first() {
        let l = log();
        let now = Utc::now();
        l.append(msg(1, "first"), now).unwrap();
        l.append(msg(1, "second"), now).unwrap();
        l.append(msg(1, "third"), now).unwrap();

        let recent = l.recent(1, None, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "second");
        assert_eq!(recent[1].text, "third");
    }

    #[test]
    fn created_at_is_monotonic_within_same_instant() {
        let l = log();
        let now = Utc::now();
        let a = l.append(msg(1, "a"), now).unwrap();
        let b = l.append(msg(1, "b"), now).unwrap();
        assert!(b.created_at > a.created_at);
    }

    #[test]
    fn distinct_chats_are_independent() {
        let l = log();
        let now = Utc::now();
        l.append(msg(1, "a"), now).unwrap();
        l.append(msg(2, "b"), now).unwrap();
        assert_eq!(l.recent(1, None, 10).unwrap().len(), 1);
        assert_eq!(l.recent(2, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn prune_older_than_removes_stale_rows() {
        let l = log();
        let old = Utc::now() - Duration::days(40);
        l.append(msg(1, "stale"), old).unwrap();
        l.append(msg(1, "fresh"), Utc::now()).unwrap();

        let removed = l.prune_older_than(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(l.recent(1, None, 10).unwrap()[0].text, "fresh");
    }

    #[test]
    fn clear_chat_removes_only_that_chat() {
        let l = log();
        let now = Utc::now();
        l.append(msg(1, "a"), now).unwrap();
        l.append(msg(2, "b"), now).unwrap();
        let removed = l.clear_chat(1, None).unwrap();
        assert_eq!(removed, 1);
        assert!(l.recent(1, None, 10).unwrap().is_empty());
        assert_eq!(l.recent(2, None, 10).unwrap().len(), 1);
    }
}
