//! Scheduler loop (spec.md §4.5): one logical worker, adaptive sleep,
//! three debounced wakeup triggers (timer, OS signal, jobs-db file-change
//! hint), cooperative reentrancy (`running` guard + `pending` flag).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::dnd::{is_active, DndState, DndWindow};
use crate::error::Result;
use crate::events::EventStore;
use crate::heartbeat::{run_heartbeat, HeartbeatSink};
use crate::jobs::JobStore;
use crate::schedule::next_run_of;
use crate::script;
use crate::types::{ContextMode, Job, JobType, MessageJobPayload, ScriptJobPayload};

const DEBOUNCE: StdDuration = StdDuration::from_millis(200);
const MAX_SLEEP: StdDuration = StdDuration::from_secs(30);
const STALE_AFTER: ChronoDuration = ChronoDuration::minutes(30);
const CLAIM_LIMIT: i64 = 10;

/// Seam for dispatching a due job's payload to the rest of the daemon
/// (spec.md §4.7). Errors are logged; the job keeps its prior `nextRunAt`
/// so the next tick retries (no retry budget — intentional, §4.5).
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        text: &str,
    ) -> std::result::Result<(), String>;

    async fn agent_turn(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        prompt: &str,
        context_mode: ContextMode,
    ) -> std::result::Result<(), String>;
}

pub struct SchedulerConfig {
    pub jobs_db_path: PathBuf,
    pub pid_file: PathBuf,
    pub scripts_root: PathBuf,
    pub dnd_window: DndWindow,
    pub dnd_state_path: PathBuf,
    pub heartbeat_enabled: bool,
}

pub struct SchedulerLoop {
    jobs: JobStore,
    events: EventStore,
    sink: Arc<dyn JobSink>,
    heartbeat_sink: Option<Arc<dyn HeartbeatSink>>,
    config: SchedulerConfig,
    /// Reentrancy guard: only one tick body runs at a time.
    running: AtomicBool,
    /// Set when a wakeup arrives while `running`; consumed at the top of
    /// the next scheduling pass.
    pending: AtomicBool,
}

impl SchedulerLoop {
    pub fn new(
        jobs: JobStore,
        events: EventStore,
        sink: Arc<dyn JobSink>,
        heartbeat_sink: Option<Arc<dyn HeartbeatSink>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            events,
            sink,
            heartbeat_sink,
            config,
            running: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    /// Drive the loop until `shutdown` broadcasts `true`. Never panics on a
    /// single tick's failure — failures are logged and the loop continues.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = std::fs::write(&self.config.pid_file, std::process::id().to_string()) {
            warn!("failed to write pid file (best-effort): {e}");
        }

        let wake = Arc::new(Notify::new());
        spawn_signal_wakeup(wake.clone());
        spawn_file_watch_wakeup(wake.clone(), self.config.jobs_db_path.clone());

        info!("scheduler loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_tick_guarded().await;

            let sleep_for = self.compute_sleep_duration();

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = debounced(&wake) => {
                    debug!("scheduler woken by external signal");
                }
                _ = shutdown.changed() => {}
            }
        }

        info!("scheduler loop shutting down");
        let _ = std::fs::remove_file(&self.config.pid_file);
    }

    /// Enforces the "exactly one tick body executes at a time" contract. If
    /// a wakeup arrives mid-tick, it's recorded in `pending` and honored by
    /// looping once more instead of being dropped.
    async fn run_tick_guarded(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.pending.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            if let Err(e) = self.tick().await {
                error!("scheduler tick error: {e}");
            }
            if !self.pending.swap(false, Ordering::SeqCst) {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    async fn tick(&self) -> Result<()> {
        if self.config.heartbeat_enabled {
            if let Some(sink) = &self.heartbeat_sink {
                let now = Utc::now();
                if let Err(e) = run_heartbeat(&self.events, sink.as_ref(), now, STALE_AFTER).await {
                    error!("heartbeat dispatch error: {e}");
                }
            }
        }

        loop {
            let now = Utc::now();
            let due = self.jobs.claim_due(now, CLAIM_LIMIT)?;
            if due.is_empty() {
                break;
            }
            for job in due {
                self.execute_job(job, now).await;
            }
        }

        Ok(())
    }

    async fn execute_job(&self, job: Job, now: chrono::DateTime<Utc>) {
        // DND gate (spec.md §4.4/§4.5): only send_message/agent_turn jobs
        // are deferred; script jobs run regardless.
        if matches!(job.job_type, JobType::SendMessage | JobType::AgentTurn) {
            let urgent = job
                .payload
                .get("urgent")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let mut dnd_state: DndState =
                bob_core::atomic::read_json_or_default(&self.config.dnd_state_path);
            let status = is_active(&self.config.dnd_window, &mut dnd_state, now);
            let _ = bob_core::atomic::write_json_atomic(&self.config.dnd_state_path, &dnd_state);

            if status.active && !urgent {
                let ends_at = status.ends_at.unwrap_or(now);
                if let Err(e) = self.jobs.update_after_run(&job.id, job.last_run_at, Some(ends_at), true) {
                    error!(job_id = %job.id, "failed to defer job for DND: {e}");
                }
                info!(job_id = %job.id, reason = status.reason, ends_at = %ends_at, "job deferred for DND");
                return;
            }
        }

        let outcome = self.dispatch(&job).await;

        if let Err(e) = &outcome {
            // Failure: next_run_at is not advanced, so the next tick retries.
            error!(job_id = %job.id, error = %e, "job execution failed, will retry next tick");
            return;
        }

        let next_run_at = if job.schedule_kind == crate::types::ScheduleKind::At {
            None
        } else {
            next_run_of(job.schedule_kind, &job.schedule_spec, now)
        };
        let enabled = next_run_at.is_some();

        if let Err(e) = self
            .jobs
            .update_after_run(&job.id, Some(now), next_run_at, enabled)
        {
            error!(job_id = %job.id, "failed to write back job state: {e}");
        }
    }

    async fn dispatch(&self, job: &Job) -> std::result::Result<(), String> {
        match job.job_type {
            JobType::SendMessage => {
                let payload: MessageJobPayload =
                    serde_json::from_value(job.payload.clone()).map_err(|e| e.to_string())?;
                self.sink
                    .send_message(job.chat_id, job.thread_id, &payload.text)
                    .await
            }
            JobType::AgentTurn => {
                let payload: MessageJobPayload =
                    serde_json::from_value(job.payload.clone()).map_err(|e| e.to_string())?;
                let mut prompt = format!("[SCHEDULED REMINDER] {}", payload.text);
                if let Some(original) = &payload.original_request {
                    prompt.push_str(&format!("\n\n[ORIGINAL USER REQUEST]\n{original}"));
                }
                self.sink
                    .agent_turn(job.chat_id, job.thread_id, &prompt, job.context_mode)
                    .await
            }
            JobType::Script => self.execute_script_job(job).await,
        }
    }

    async fn execute_script_job(&self, job: &Job) -> std::result::Result<(), String> {
        let payload: ScriptJobPayload =
            serde_json::from_value(job.payload.clone()).map_err(|e| e.to_string())?;
        let path = script::resolve_script_path(&self.config.scripts_root, &payload.script)
            .map_err(|e| e.to_string())?;
        let outcome = script::execute(&path, &payload.args)
            .await
            .map_err(|e| e.to_string())?;

        if !payload.notify {
            return Ok(());
        }

        let text = match outcome.exit_code {
            Some(0) => format!("script `{}` succeeded:\n{}", payload.script, outcome.stdout),
            Some(code) => format!(
                "script `{}` failed (exit {code}):\n{}",
                payload.script, outcome.stderr
            ),
            None => format!("script `{}` timed out", payload.script),
        };
        self.sink
            .send_message(job.chat_id, job.thread_id, &text)
            .await
    }

    fn compute_sleep_duration(&self) -> StdDuration {
        if let Ok(n) = self.events.count_pending(Utc::now(), STALE_AFTER) {
            if n > 0 {
                return StdDuration::from_secs(0);
            }
        }

        match self.jobs.next_run_at() {
            Ok(Some(next)) => {
                let delta = (next - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
                delta.min(MAX_SLEEP)
            }
            _ => MAX_SLEEP,
        }
    }
}

/// Debounce a burst of `Notify` wakeups into a single return: wait for the
/// first notification, then a further `DEBOUNCE` window collapsing
/// anything that arrives during it.
async fn debounced(wake: &Notify) {
    wake.notified().await;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(DEBOUNCE) => break,
            _ = wake.notified() => continue,
        }
    }
}

#[cfg(unix)]
fn spawn_signal_wakeup(wake: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let Ok(mut stream) = signal(SignalKind::user_defined1()) else {
            warn!("failed to install SIGUSR1 handler");
            return;
        };
        loop {
            stream.recv().await;
            wake.notify_one();
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_wakeup(_wake: Arc<Notify>) {}

/// Best-effort file-change hint on the jobs database path (spec.md §4.5,
/// §9: "a reimplementation may omit the file-watch hint when OS signalling
/// is reliable" — kept here as a secondary source, never required).
fn spawn_file_watch_wakeup(wake: Arc<Notify>, jobs_db_path: PathBuf) {
    use notify::{RecommendedWatcher, RecursiveMode, Watcher};

    let Some(parent) = jobs_db_path.parent().map(PathBuf::from) else {
        return;
    };

    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                warn!("failed to create jobs-db file watcher (best-effort): {e}");
                return;
            }
        };

        if watcher.watch(&parent, RecursiveMode::NonRecursive).is_err() {
            warn!("failed to watch jobs-db directory (best-effort)");
            return;
        }

        while let Some(res) = rx.recv().await {
            if let Ok(event) = res {
                if event.paths.iter().any(|p| p == &jobs_db_path) {
                    wake.notify_one();
                }
            }
        }
    });
}
