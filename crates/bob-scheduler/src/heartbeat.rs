//! Heartbeat dispatcher (spec.md §4.6): claims all pending events, groups
//! them by `(chatId, threadId)`, and asks a [`HeartbeatSink`] to turn each
//! group into (at most) one engine invocation.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info};

use crate::error::Result;
use crate::events::EventStore;
use crate::types::Event;

/// Seam between the scheduler and the rest of the daemon (engine + streaming
/// reply engine + message log). Grounded in the same generic-trait
/// decoupling the teacher uses to keep its pipeline channel-agnostic.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    /// Handle one `(chatId, threadId)` group of events, in `createdAt`
    /// order. Implementations assemble the heartbeat prompt (§4.6 steps
    /// a-d), invoke the engine through the streaming reply engine with the
    /// silent-token set `{HEARTBEAT_OK, NO_REPLY}`, and return `Err` if
    /// anything in the group failed — the whole claim is released, not
    /// acked, on any group error.
    async fn dispatch_group(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        events: &[Event],
    ) -> std::result::Result<(), String>;
}

/// Claim pending events, group by `(chatId, threadId)` preserving insertion
/// order within each group, dispatch every group, and ack the whole claim
/// only if every group succeeded. Any group failure releases the claim so
/// events become eligible for re-claim after the stale window.
pub async fn run_heartbeat(
    events: &EventStore,
    sink: &dyn HeartbeatSink,
    now: DateTime<Utc>,
    stale_after: ChronoDuration,
) -> Result<()> {
    let (token, claimed) = events.claim(now, 20, stale_after)?;
    if claimed.is_empty() {
        return Ok(());
    }

    let mut groups: Vec<((i64, Option<i64>), Vec<Event>)> = Vec::new();
    for ev in claimed {
        let key = (ev.chat_id, ev.thread_id);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, bucket)) => bucket.push(ev),
            None => groups.push((key, vec![ev])),
        }
    }

    let mut all_ok = true;
    for ((chat_id, thread_id), group_events) in &groups {
        if let Err(e) = sink.dispatch_group(*chat_id, *thread_id, group_events).await {
            error!(chat_id, ?thread_id, error = %e, "heartbeat group dispatch failed");
            all_ok = false;
        }
    }

    if all_ok {
        let acked = events.ack(&token, Utc::now())?;
        info!(acked, groups = groups.len(), "heartbeat claim acked");
    } else {
        events.release(&token)?;
        info!("heartbeat claim released after group failure");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_events_db;
    use crate::types::NewEvent;
    use std::sync::Mutex;

    struct RecordingSink {
        calls: Mutex<Vec<(i64, Option<i64>, usize)>>,
        fail_chat: Option<i64>,
    }

    #[async_trait]
    impl HeartbeatSink for RecordingSink {
        async fn dispatch_group(
            &self,
            chat_id: i64,
            thread_id: Option<i64>,
            events: &[Event],
        ) -> std::result::Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push((chat_id, thread_id, events.len()));
            if Some(chat_id) == self.fail_chat {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn groups_by_chat_and_acks_on_success() {
        let store = EventStore::new(open_events_db(std::path::Path::new(":memory:")).unwrap());
        let now = Utc::now();
        store
            .add(
                NewEvent {
                    chat_id: 1,
                    thread_id: None,
                    kind: "a".into(),
                    payload: serde_json::json!({}),
                },
                now,
            )
            .unwrap();
        store
            .add(
                NewEvent {
                    chat_id: 1,
                    thread_id: None,
                    kind: "b".into(),
                    payload: serde_json::json!({}),
                },
                now,
            )
            .unwrap();
        store
            .add(
                NewEvent {
                    chat_id: 2,
                    thread_id: None,
                    kind: "c".into(),
                    payload: serde_json::json!({}),
                },
                now,
            )
            .unwrap();

        let sink = RecordingSink {
            calls: Mutex::new(Vec::new()),
            fail_chat: None,
        };
        run_heartbeat(&store, &sink, now, ChronoDuration::minutes(30))
            .await
            .unwrap();

        let calls = sink.calls.into_inner().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(store.list(false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_group_releases_claim() {
        let store = EventStore::new(open_events_db(std::path::Path::new(":memory:")).unwrap());
        let now = Utc::now();
        store
            .add(
                NewEvent {
                    chat_id: 9,
                    thread_id: None,
                    kind: "x".into(),
                    payload: serde_json::json!({}),
                },
                now,
            )
            .unwrap();

        let sink = RecordingSink {
            calls: Mutex::new(Vec::new()),
            fail_chat: Some(9),
        };
        run_heartbeat(&store, &sink, now, ChronoDuration::minutes(30))
            .await
            .unwrap();

        assert_eq!(store.count_pending(now, ChronoDuration::minutes(30)).unwrap(), 1);
    }
}
