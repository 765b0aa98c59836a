//! Job scheduler and event queue with SQLite persistence.
//!
//! Jobs are persisted to a SQLite `jobs` table; [`loop_::SchedulerLoop`] drains
//! due jobs every tick, dispatching through [`loop_::JobSink`], gating on the
//! DND predicate ([`dnd`]), and rescheduling via [`schedule::next_run_of`].
//! Asynchronous "wake up and decide" signals flow through the [`events`]
//! claim-token queue and are drained by [`heartbeat::run_heartbeat`].
//!
//! # Schedule kinds
//!
//! | Kind    | Behaviour                                          |
//! |---------|-----------------------------------------------------|
//! | `at`    | Single fire at an absolute instant, then disabled    |
//! | `every` | Repeat every fixed duration                          |
//! | `cron`  | Standard 5-field cron expression                     |

pub mod db;
pub mod dnd;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod jobs;
pub mod loop_;
pub mod schedule;
pub mod script;
pub mod types;

pub use dnd::DndWindow;
pub use error::{Result, SchedulerError};
pub use events::EventStore;
pub use heartbeat::{run_heartbeat, HeartbeatSink};
pub use jobs::JobStore;
pub use loop_::{JobSink, SchedulerConfig, SchedulerLoop};
pub use types::{
    ContextMode, Event, Job, JobType, MessageJobPayload, NewEvent, NewJob, ScheduleKind,
    ScriptJobPayload,
};
