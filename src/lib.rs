//! Deterministic, inspectable event scheduling
//!
//! This crate provides a family of event schedulers sharing one contract:
//! - Parses nothing and persists nothing: callers submit time-stamped
//!   closures and the schedulers order them under `(time, sequence)`
//! - A virtual-time discrete scheduler with pause/resume and bounded runs
//! - A passive scheduler driven entirely by explicit calls
//! - A realtime executor scheduler over a single delay-queue worker
//! - A busy-loop scheduler polling interchangeable ready-queue disciplines
//! - A source-tracking wrapper multiplexing logical schedulers onto one
//!   backing scheduler, with per-source virtual pause
//! - A repeating-work builder and failure routing shared by all variants

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bus;
pub mod busyloop;
pub mod discrete;
pub mod error;
pub mod event;
pub mod failure;
pub mod queue;
pub mod realtime;
pub mod repeating;
pub mod scheduler;
pub mod sourced;
pub mod time;

pub use bus::ExecutionLayer;
pub use busyloop::{BusyLoopConfig, BusyLoopMetrics, BusyLoopScheduler};
pub use discrete::{
    DiscreteEventScheduler, DiscreteSchedulerConfig, PassiveEventScheduler, TimeInPastPolicy,
};
pub use error::{SchedulerError, SchedulerResult};
pub use event::{EventHandle, EventKey};
pub use failure::{EventFailure, FailureListener, FailurePolicy};
pub use queue::{ReadyQueue, ReadyQueueKind};
pub use realtime::{RealtimeExecutorScheduler, RealtimeSchedulerConfig};
pub use repeating::{Repeating, RepeatingHandle};
pub use scheduler::{EventScheduler, SchedulerStatus, SchedulerTag};
pub use sourced::{SourceTracker, SourcedScheduler, SourcedSchedulerFamily};
pub use time::{TimeConverter, TimeProvider, TimeUnit, VirtualTimeProvider, WallClockTimeProvider};
