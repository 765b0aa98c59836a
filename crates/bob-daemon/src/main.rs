use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use bob_core::atomic::{read_json_or_default, write_json_atomic};
use bob_engine::EngineRegistry;
use bob_recall::RecallIndex;
use bob_scheduler::{
    open_events_db, open_jobs_db, DndWindow, EventStore, JobStore, NewEvent, SchedulerConfig,
    SchedulerLoop,
};
use bob_sessions::{open_messages_db, MessageLog, SessionStore};
use bob_telegram::{BobContext, TelegramAdapter};

mod app;

use app::DaemonSink;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LastExit {
    #[serde(rename = "exitCode")]
    exit_code: i32,
    timestamp: chrono::DateTime<chrono::Utc>,
    stderr: Option<String>,
}

/// Exit codes that don't warrant a `daemon_crashed` alert: clean exit and
/// the common interrupt signals (spec.md §6).
const CLEAN_EXIT_CODES: &[i32] = &[0, 130, 143];

/// Written to `last_exit.json` at startup, before any real work happens,
/// and overwritten with `0` only on a graceful shutdown. If the process
/// dies any other way (panic, SIGKILL, OOM), this sentinel is what the
/// next startup finds — the marker's presence, not its accuracy, is what
/// signals an unclean exit.
const DIRTY_SENTINEL: i32 = i32::MIN;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bob=info".into()),
        )
        .init();

    let config = bob_core::config::BobConfig::load(None)?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(config.memory_dir())?;

    let bot = teloxide::Bot::new(config.telegram.token.clone());

    let jobs_db_path = data_dir.join("jobs.db");
    let events_db_path = data_dir.join("events.db");
    let messages_db_path = data_dir.join("messages.db");
    let recall_db_path = data_dir.join("bob.db");

    check_last_exit(&config, &events_db_path, &data_dir)?;
    write_last_exit(&data_dir, DIRTY_SENTINEL, None);
    install_panic_hook(data_dir.clone());

    let jobs = JobStore::new(open_jobs_db(&jobs_db_path)?);
    let events = EventStore::new(open_events_db(&events_db_path)?);
    let messages = Arc::new(MessageLog::new(open_messages_db(&messages_db_path)?));

    let sessions_path = data_dir.join("sessions.json");
    let current_cwd = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sessions = Arc::new(SessionStore::load(sessions_path, &current_cwd).await?);

    let engines = Arc::new(EngineRegistry::from_config(&config.engines));

    let recall: Option<Arc<RecallIndex>> = match RecallIndex::open(&recall_db_path, None) {
        Ok(index) => {
            let index = Arc::new(index);
            let memory_dir = config.memory_dir();
            let idx = Arc::clone(&index);
            tokio::spawn(async move {
                match idx.index_all(&memory_dir).await {
                    Ok(reindexed) if !reindexed.is_empty() => {
                        info!(count = reindexed.len(), "recall: reindexed memory files")
                    }
                    Ok(_) => {}
                    Err(e) => warn!("recall: initial index pass failed: {e}"),
                }
            });
            Some(index)
        }
        Err(e) => {
            warn!("recall: failed to open index, recall disabled: {e}");
            None
        }
    };

    // JobStore's `Arc` is shared with BobContext so the Telegram handler's
    // `/status` can read pending jobs; the scheduler loop owns its own
    // handle via the (cheap, Send+Sync) SQLite connection wrapper.
    let jobs_for_ctx = Arc::new(JobStore::new(open_jobs_db(&jobs_db_path)?));

    let ctx = Arc::new(BobContext {
        config: config.clone(),
        sessions,
        messages,
        engines,
        recall,
        jobs: jobs_for_ctx,
    });

    let dnd_window = dnd_window_from_config(&config.dnd, &config.timezone);

    let scheduler_config = SchedulerConfig {
        jobs_db_path: jobs_db_path.clone(),
        pid_file: data_dir.join("scheduler.pid"),
        scripts_root: data_dir.join("scripts"),
        dnd_window,
        dnd_state_path: data_dir.join("dnd-state.json"),
        heartbeat_enabled: config.heartbeat.enabled,
    };

    let sink = Arc::new(DaemonSink::new(bot.clone(), Arc::clone(&ctx)));
    let job_sink: Arc<dyn bob_scheduler::JobSink> = sink.clone();
    let heartbeat_sink: Arc<dyn bob_scheduler::HeartbeatSink> = sink;
    let scheduler = Arc::new(SchedulerLoop::new(
        jobs,
        events,
        job_sink,
        Some(heartbeat_sink),
        scheduler_config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(shutdown_rx).await }
    });

    let adapter = TelegramAdapter::new(bot, ctx);
    let adapter_handle = tokio::spawn(adapter.run());

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_handle.await;
    adapter_handle.abort();

    write_last_exit(&data_dir, 0, None);

    Ok(())
}

/// On startup, check the previous process's exit marker. A non-clean exit
/// gets synthesized as a `daemon_crashed` event addressed to the first
/// allow-listed chat (spec.md §6, §9) — it flows through the ordinary
/// event queue/heartbeat path rather than bypassing the engine, same as
/// any other queued event. Does not touch the marker itself; the caller
/// overwrites it right after with this run's own dirty sentinel.
fn check_last_exit(
    config: &bob_core::config::BobConfig,
    events_db_path: &std::path::Path,
    data_dir: &std::path::Path,
) -> anyhow::Result<()> {
    let marker_path = data_dir.join("last_exit.json");
    let last: LastExit = read_json_or_default(&marker_path);

    if last.timestamp == chrono::DateTime::<chrono::Utc>::default() {
        return Ok(());
    }

    if !CLEAN_EXIT_CODES.contains(&last.exit_code) {
        if let Some(&chat_id) = config.telegram.allowlist.first() {
            let stderr_excerpt: String = last.stderr.as_deref().unwrap_or("").chars().take(2000).collect();
            let events = EventStore::new(open_events_db(events_db_path)?);
            events.add(
                NewEvent {
                    chat_id,
                    thread_id: None,
                    kind: "daemon_crashed".to_string(),
                    payload: serde_json::json!({
                        "exitCode": last.exit_code,
                        "stderr": stderr_excerpt,
                    }),
                },
                chrono::Utc::now(),
            )?;
        }
    }

    Ok(())
}

fn write_last_exit(data_dir: &std::path::Path, exit_code: i32, stderr: Option<String>) {
    let marker_path = data_dir.join("last_exit.json");
    let marker = LastExit {
        exit_code,
        timestamp: chrono::Utc::now(),
        stderr,
    };
    let _ = write_json_atomic(&marker_path, &marker);
}

/// Capture a panic's message into the dirty marker so the next startup's
/// `daemon_crashed` event carries a useful `stderr` excerpt, on top of the
/// default panic output already going to the real stderr stream.
fn install_panic_hook(data_dir: std::path::PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_last_exit(&data_dir, DIRTY_SENTINEL, Some(info.to_string()));
        default_hook(info);
    }));
}

fn dnd_window_from_config(dnd: &bob_core::config::DndConfig, timezone: &str) -> DndWindow {
    let tz = chrono_tz::Tz::from_str(timezone).unwrap_or(chrono_tz::UTC);
    DndWindow {
        enabled: dnd.enabled,
        start_minutes: parse_hhmm(&dnd.start),
        end_minutes: parse_hhmm(&dnd.end),
        tz,
    }
}

fn parse_hhmm(s: &str) -> u32 {
    let mut parts = s.splitn(2, ':');
    let h: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let m: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    h * 60 + m
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
