//! Event store (spec.md §4.2): durable, claim-token-based at-least-once
//! queue. A claim token decouples the claimer from row identities — the
//! dispatcher only ever carries a token, never a list of row ids.

use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Event, NewEvent};

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Serialize `payload` to JSON, storing `{}` if empty or invalid.
    pub fn add(&self, input: NewEvent, now: DateTime<Utc>) -> Result<Event> {
        let payload = if input.payload.is_null() {
            serde_json::json!({})
        } else {
            input.payload
        };
        let payload_str = serde_json::to_string(&payload)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (bob_id, chat_id, thread_id, kind, payload, created_at)
             VALUES ('bob', ?1, ?2, ?3, ?4, ?5)",
            params![
                input.chat_id,
                input.thread_id,
                input.kind,
                payload_str,
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Event {
            id,
            chat_id: input.chat_id,
            thread_id: input.thread_id,
            kind: input.kind,
            payload,
            created_at: now,
            claimed_at: None,
            claim_token: None,
            processed_at: None,
        })
    }

    /// All events, or only unprocessed ones.
    pub fn list(&self, include_processed: bool) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_processed {
            "SELECT id, chat_id, thread_id, kind, payload, created_at,
                    claimed_at, claim_token, processed_at
             FROM events ORDER BY id"
        } else {
            "SELECT id, chat_id, thread_id, kind, payload, created_at,
                    claimed_at, claim_token, processed_at
             FROM events WHERE processed_at IS NULL ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_event)?;
        rows.map(|r| r.map_err(crate::error::SchedulerError::from)).collect()
    }

    /// Pending count, excluding claims newer than `now - stale_after`
    /// (spec.md §3's *pending* predicate).
    pub fn count_pending(&self, now: DateTime<Utc>, stale_after: ChronoDuration) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let stale_before = (now - stale_after).to_rfc3339();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events
             WHERE processed_at IS NULL AND (claimed_at IS NULL OR claimed_at <= ?1)",
            params![stale_before],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Transactional claim: generate a fresh token, mark the pending rows
    /// (same predicate as `count_pending`) with it, then select them.
    pub fn claim(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        stale_after: ChronoDuration,
    ) -> Result<(String, Vec<Event>)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let token = Uuid::new_v4().to_string();
        let now_str = now.to_rfc3339();
        let stale_before = (now - stale_after).to_rfc3339();

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM events
                 WHERE processed_at IS NULL AND (claimed_at IS NULL OR claimed_at <= ?1)
                 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![stale_before, limit], |row| row.get::<_, i64>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        if ids.is_empty() {
            tx.commit()?;
            return Ok((token, Vec::new()));
        }

        {
            let mut upd = tx.prepare(
                "UPDATE events SET claimed_at = ?1, claim_token = ?2 WHERE id = ?3",
            )?;
            for id in &ids {
                upd.execute(params![now_str, token, id])?;
            }
        }

        let claimed: Vec<Event> = {
            let mut stmt = tx.prepare(
                "SELECT id, chat_id, thread_id, kind, payload, created_at,
                        claimed_at, claim_token, processed_at
                 FROM events WHERE claim_token = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![token], row_to_event)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.commit()?;
        Ok((token, claimed))
    }

    /// Mark every row carrying `claim_token` processed. A zero-row match is
    /// silently a no-op (spec.md §9 open question (a)).
    pub fn ack(&self, claim_token: &str, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE events SET processed_at = ?1 WHERE claim_token = ?2 AND processed_at IS NULL",
            params![now.to_rfc3339(), claim_token],
        )?;
        Ok(n as u64)
    }

    /// Return claimed rows to pending by clearing `claimed_at`/`claim_token`.
    pub fn release(&self, claim_token: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE events SET claimed_at = NULL, claim_token = NULL
             WHERE claim_token = ?1 AND processed_at IS NULL",
            params![claim_token],
        )?;
        Ok(n as u64)
    }

    pub fn prune_processed_older_than(&self, days: i64, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (now - ChronoDuration::days(days)).to_rfc3339();
        let n = conn.execute(
            "DELETE FROM events WHERE processed_at IS NOT NULL AND processed_at < ?1",
            params![cutoff],
        )?;
        Ok(n as u64)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let payload_str: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let claimed_at: Option<String> = row.get(6)?;
    let processed_at: Option<String> = row.get(8)?;

    Ok(Event {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        thread_id: row.get(2)?,
        kind: row.get(3)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        claimed_at: claimed_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        claim_token: row.get(7)?,
        processed_at: processed_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_events_db;

    fn store() -> EventStore {
        EventStore::new(open_events_db(std::path::Path::new(":memory:")).unwrap())
    }

    fn new_event() -> NewEvent {
        NewEvent {
            chat_id: 1,
            thread_id: None,
            kind: "task_failed".into(),
            payload: serde_json::json!({"error": "timeout"}),
        }
    }

    #[test]
    fn add_then_claim_then_ack() {
        let s = store();
        let now = Utc::now();
        s.add(new_event(), now).unwrap();
        assert_eq!(s.count_pending(now, ChronoDuration::minutes(30)).unwrap(), 1);

        let (token, events) = s.claim(now, 20, ChronoDuration::minutes(30)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(s.count_pending(now, ChronoDuration::minutes(30)).unwrap(), 0);

        let n = s.ack(&token, now).unwrap();
        assert_eq!(n, 1);
        assert!(s.list(false).unwrap().is_empty());
        assert_eq!(s.list(true).unwrap().len(), 1);
    }

    #[test]
    fn release_returns_to_pending() {
        let s = store();
        let now = Utc::now();
        s.add(new_event(), now).unwrap();
        let (token, events) = s.claim(now, 20, ChronoDuration::minutes(30)).unwrap();
        assert_eq!(events.len(), 1);
        s.release(&token).unwrap();
        assert_eq!(s.count_pending(now, ChronoDuration::minutes(30)).unwrap(), 1);
    }

    #[test]
    fn stale_claim_is_reclaimable() {
        let s = store();
        let t0 = Utc::now() - ChronoDuration::minutes(40);
        s.add(new_event(), t0).unwrap();
        let (_token, first) = s.claim(t0, 20, ChronoDuration::minutes(30)).unwrap();
        assert_eq!(first.len(), 1);

        // 40 minutes later, the claim is stale and reclaimable.
        let now = t0 + ChronoDuration::minutes(40);
        let (_token2, reclaimed) = s.claim(now, 20, ChronoDuration::minutes(30)).unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[test]
    fn ack_unknown_token_is_noop() {
        let s = store();
        let n = s.ack("nonexistent", Utc::now()).unwrap();
        assert_eq!(n, 0);
    }
}
