//! Job store (spec.md §4.1): narrow data-access layer over the `jobs`
//! table. `claim_due` is the only mechanism that prevents duplicate
//! delivery of one-shot jobs — see its doc comment.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SchedulerError};
use crate::schedule::next_run_of;
use crate::types::{ContextMode, Job, JobType, NewJob, ScheduleKind};

pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Insert a job, computing `nextRunAt = nextRunOf(kind, spec, now)`.
    /// Fails with `InvalidSchedule` if `spec` doesn't parse for `kind`.
    pub fn add(&self, input: NewJob, now: DateTime<Utc>) -> Result<Job> {
        let next_run_at = next_run_of(input.schedule_kind, &input.schedule_spec, now).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!(
                "{} spec does not parse: {}",
                input.schedule_kind, input.schedule_spec
            ))
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let payload_str = serde_json::to_string(&input.payload)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs
               (id, chat_id, thread_id, schedule_kind, schedule_spec, job_type,
                payload, enabled, next_run_at, last_run_at, context_mode, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,1,?8,NULL,?9,?10)",
            params![
                id,
                input.chat_id,
                input.thread_id,
                input.schedule_kind.to_string(),
                input.schedule_spec,
                input.job_type.to_string(),
                payload_str,
                next_run_at.to_rfc3339(),
                input.context_mode.to_string(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Job {
            id,
            chat_id: input.chat_id,
            thread_id: input.thread_id,
            schedule_kind: input.schedule_kind,
            schedule_spec: input.schedule_spec,
            job_type: input.job_type,
            payload: input.payload,
            enabled: true,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            context_mode: input.context_mode,
            created_at: now,
        })
    }

    /// All jobs, ordered by id.
    pub fn list(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, thread_id, schedule_kind, schedule_spec, job_type,
                    payload, enabled, next_run_at, last_run_at, context_mode, created_at
             FROM jobs ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        rows.map(|r| r.map_err(SchedulerError::from)).collect()
    }

    /// Jobs for one chat, ordered by next-run-at.
    pub fn list_for_chat(&self, chat_id: i64) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, thread_id, schedule_kind, schedule_spec, job_type,
                    payload, enabled, next_run_at, last_run_at, context_mode, created_at
             FROM jobs WHERE chat_id = ?1 ORDER BY next_run_at",
        )?;
        let rows = stmt.query_map(params![chat_id], row_to_job)?;
        rows.map(|r| r.map_err(SchedulerError::from)).collect()
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, chat_id, thread_id, schedule_kind, schedule_spec, job_type,
                    payload, enabled, next_run_at, last_run_at, context_mode, created_at
             FROM jobs WHERE id = ?1",
            params![id],
            row_to_job,
        )
        .optional()
        .map_err(SchedulerError::from)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Transactional claim of due jobs (spec.md §4.1, §8 invariant 1/2).
    ///
    /// Selects rows with `enabled = 1 AND next_run_at <= now`, ordered
    /// ascending by `next_run_at, id`, limited to `limit`. Within the same
    /// transaction, `at`-kind rows are flipped to `enabled = 0` so a
    /// concurrent claimer can never see them again — this flip is the only
    /// mechanism preventing duplicate delivery of one-shot jobs. Non-`at`
    /// rows stay enabled; their rescheduling happens in `update_after_run`.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now_str = now.to_rfc3339();

        let due: Vec<Job> = {
            let mut stmt = tx.prepare(
                "SELECT id, chat_id, thread_id, schedule_kind, schedule_spec, job_type,
                        payload, enabled, next_run_at, last_run_at, context_mode, created_at
                 FROM jobs
                 WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
                 ORDER BY next_run_at ASC, id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![now_str, limit], row_to_job)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for job in &due {
            if job.schedule_kind == ScheduleKind::At {
                tx.execute(
                    "UPDATE jobs SET enabled = 0 WHERE id = ?1",
                    params![job.id],
                )?;
            }
        }

        tx.commit()?;
        Ok(due)
    }

    /// Idempotent writeback after running (or deferring) a claimed job.
    pub fn update_after_run(
        &self,
        id: &str,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
        enabled: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET last_run_at = ?1, next_run_at = ?2, enabled = ?3 WHERE id = ?4",
            params![
                last_run_at.map(|t| t.to_rfc3339()),
                next_run_at.map(|t| t.to_rfc3339()),
                enabled as i64,
                id,
            ],
        )?;
        Ok(())
    }

    /// `MIN(nextRunAt) WHERE enabled` — drives the scheduler loop's sleep
    /// computation (spec.md §4.1, §4.5).
    pub fn next_run_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn.query_row(
            "SELECT MIN(next_run_at) FROM jobs WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))))
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let schedule_kind: String = row.get(3)?;
    let job_type: String = row.get(5)?;
    let payload_str: String = row.get(6)?;
    let context_mode: String = row.get(10)?;
    let next_run_at: Option<String> = row.get(8)?;
    let last_run_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(11)?;

    Ok(Job {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        thread_id: row.get(2)?,
        schedule_kind: schedule_kind
            .parse::<ScheduleKind>()
            .unwrap_or(ScheduleKind::At),
        schedule_spec: row.get(4)?,
        job_type: job_type.parse::<JobType>().unwrap_or(JobType::SendMessage),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        enabled: row.get::<_, i64>(7)? != 0,
        next_run_at: next_run_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        last_run_at: last_run_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        context_mode: context_mode.parse::<ContextMode>().unwrap_or(ContextMode::Session),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_jobs_db;

    fn store() -> JobStore {
        JobStore::new(open_jobs_db(std::path::Path::new(":memory:")).unwrap())
    }

    fn new_job() -> NewJob {
        NewJob {
            chat_id: 42,
            thread_id: None,
            schedule_kind: ScheduleKind::Every,
            schedule_spec: "60".into(),
            job_type: JobType::SendMessage,
            payload: serde_json::json!({"text": "ping"}),
            context_mode: ContextMode::Session,
        }
    }

    #[test]
    fn add_computes_next_run() {
        let s = store();
        let now = Utc::now();
        let job = s.add(new_job(), now).unwrap();
        assert_eq!(job.next_run_at.unwrap(), now + chrono::Duration::seconds(60));
    }

    #[test]
    fn claim_due_disables_at_jobs_only() {
        let s = store();
        let now = Utc::now();
        let mut at_job = new_job();
        at_job.schedule_kind = ScheduleKind::At;
        at_job.schedule_spec = (now - chrono::Duration::seconds(1)).to_rfc3339();
        let at = s.add(at_job, now).unwrap();

        let mut every_job = new_job();
        every_job.schedule_spec = "1".into();
        let every = s.add(every_job, now - chrono::Duration::seconds(5)).unwrap();

        let claimed = s.claim_due(now, 10).unwrap();
        assert_eq!(claimed.len(), 2);

        let at_after = s.get(&at.id).unwrap().unwrap();
        assert!(!at_after.enabled);
        let every_after = s.get(&every.id).unwrap().unwrap();
        assert!(every_after.enabled);
    }

    #[test]
    fn claim_due_excludes_disabled() {
        let s = store();
        let now = Utc::now();
        let mut at_job = new_job();
        at_job.schedule_kind = ScheduleKind::At;
        at_job.schedule_spec = (now - chrono::Duration::seconds(1)).to_rfc3339();
        let at = s.add(at_job, now).unwrap();

        let first = s.claim_due(now, 10).unwrap();
        assert_eq!(first.len(), 1);
        assert!(!s.get(&at.id).unwrap().unwrap().enabled);

        let second = s.claim_due(now, 10).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn next_run_at_is_min_of_enabled() {
        let s = store();
        let now = Utc::now();
        s.add(new_job(), now).unwrap();
        let mut later = new_job();
        later.schedule_spec = "3600".into();
        s.add(later, now).unwrap();
        let min = s.next_run_at().unwrap().unwrap();
        assert_eq!(min, now + chrono::Duration::seconds(60));
    }
}
