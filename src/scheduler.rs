//! Common scheduler contract
//!
//! All four scheduler variants (discrete, passive, realtime executor,
//! busy-loop) and the source-tracking wrapper present the [`EventScheduler`]
//! trait: time-stamped submission with `(time, seq)` ordering, cancellation
//! handles, quiet post-stop behaviour, and failure-listener registration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::{EventBody, EventHandle};
use crate::failure::FailureListener;
use crate::time::TimeUnit;

/// Opaque identity distinguishing schedulers and labelling events with their
/// owning source.
///
/// Two schedulers never share a tag in the same process: tags are minted
/// from random UUIDs at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerTag(#[serde(with = "uuid::serde::compact")] pub Uuid);

impl SchedulerTag {
    /// Mint a fresh tag
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SchedulerTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SchedulerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerStatus {
    /// Created, or drained of work; not executing
    Idle,
    /// Actively draining the queue
    Running,
    /// Paused; events accumulate until unpause or a bounded run
    Paused,
    /// Terminally stopped; submissions return an empty handle
    Stopped,
}

/// The shared contract of every scheduler variant.
///
/// The `*_boxed` methods are the object-safe core; the generic `do_at` /
/// `do_in` / `do_now` conveniences box the closure and forward. Submissions
/// return `Ok(None)` once the scheduler is stopped, which keeps shutdown
/// races quiet in concurrent code.
pub trait EventScheduler: Send + Sync {
    /// This scheduler's identity tag
    fn tag(&self) -> SchedulerTag;

    /// Current scheduler time
    fn now(&self) -> f64;

    /// The physical meaning of one tick, when the time provider has one
    fn time_unit(&self) -> Option<TimeUnit>;

    /// Schedule `body` for absolute time `time`
    fn do_at_boxed(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>>;

    /// Schedule `body` for the current time, ahead of any later-timed work
    fn do_now_boxed(&self, description: &str, body: EventBody)
        -> SchedulerResult<Option<EventHandle>>;

    /// Terminally stop the scheduler
    fn stop(&self);

    /// Whether the scheduler has stopped
    fn is_stopped(&self) -> bool;

    /// Number of events currently waiting (a running event is excluded)
    fn queue_size(&self) -> usize;

    /// Whether every residual queued event is a daemon
    fn has_only_daemon_events(&self) -> bool;

    /// Register a sink for failures thrown by event bodies. Listeners run in
    /// registration order.
    fn register_failure_listener(&self, listener: FailureListener);

    /// Schedule `body` at absolute time `time`
    fn do_at<F>(&self, time: f64, description: &str, body: F) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        self.do_at_boxed(time, description, false, Box::new(body))
    }

    /// Schedule a daemon event at absolute time `time`
    fn do_at_daemon<F>(
        &self,
        time: f64,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        self.do_at_boxed(time, description, true, Box::new(body))
    }

    /// Schedule `body` after a relative delay
    fn do_in<F>(&self, delay: f64, description: &str, body: F) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        self.do_at_boxed(self.now() + delay, description, false, Box::new(body))
    }

    /// Schedule a daemon event after a relative delay
    fn do_in_daemon<F>(
        &self,
        delay: f64,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        self.do_at_boxed(self.now() + delay, description, true, Box::new(body))
    }

    /// Schedule `body` for the current time
    fn do_now<F>(&self, description: &str, body: F) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        self.do_now_boxed(description, Box::new(body))
    }

    /// Schedule `body` at an absolute instant. Requires a unit-aware time
    /// provider; fails with
    /// [`SchedulerError::TimeUnitNotSpecified`] otherwise.
    fn do_at_instant<F>(
        &self,
        at: DateTime<Utc>,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        let unit = self
            .time_unit()
            .ok_or(SchedulerError::TimeUnitNotSpecified)?;
        self.do_at_boxed(unit.ticks_at(at), description, false, Box::new(body))
    }

    /// Schedule `body` after a wall-clock duration. Requires a unit-aware
    /// time provider; fails with
    /// [`SchedulerError::TimeUnitNotSpecified`] otherwise.
    fn do_in_duration<F>(
        &self,
        delay: std::time::Duration,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<EventHandle>>
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        let unit = self
            .time_unit()
            .ok_or(SchedulerError::TimeUnitNotSpecified)?;
        self.do_at_boxed(
            self.now() + unit.ticks_in(delay),
            description,
            false,
            Box::new(body),
        )
    }
}

/// Blanket forwarding so `Arc<S>` is itself a scheduler; the repeating-work
/// builder and the bus execution layer rely on this.
impl<S: EventScheduler + ?Sized> EventScheduler for Arc<S> {
    fn tag(&self) -> SchedulerTag {
        (**self).tag()
    }

    fn now(&self) -> f64 {
        (**self).now()
    }

    fn time_unit(&self) -> Option<TimeUnit> {
        (**self).time_unit()
    }

    fn do_at_boxed(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        (**self).do_at_boxed(time, description, daemon, body)
    }

    fn do_now_boxed(
        &self,
        description: &str,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        (**self).do_now_boxed(description, body)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn is_stopped(&self) -> bool {
        (**self).is_stopped()
    }

    fn queue_size(&self) -> usize {
        (**self).queue_size()
    }

    fn has_only_daemon_events(&self) -> bool {
        (**self).has_only_daemon_events()
    }

    fn register_failure_listener(&self, listener: FailureListener) {
        (**self).register_failure_listener(listener)
    }
}
