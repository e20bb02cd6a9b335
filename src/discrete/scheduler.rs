//! Cooperative virtual-time event loop

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::{Event, EventBody, EventHandle, EventKey};
use crate::failure::{FailureListener, FailurePolicy, FailureRouter};
use crate::scheduler::{EventScheduler, SchedulerStatus, SchedulerTag};
use crate::time::{TimeProvider, TimeUnit, VirtualTimeProvider};

/// What a discrete scheduler does with a submission timed before `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInPastPolicy {
    /// Reject the submission with [`SchedulerError::TimeInPast`]
    #[default]
    Fail,
    /// Log and run the event at the current time instead
    Clamp,
}

/// Configuration for [`DiscreteEventScheduler`]
#[derive(Clone)]
pub struct DiscreteSchedulerConfig {
    /// Name used in log output
    pub name: String,
    /// Initial virtual time
    pub start_time: f64,
    /// Optional physical meaning of one tick; enables instant/duration APIs
    pub unit: Option<TimeUnit>,
    /// Policy for submissions timed before `now`
    pub time_in_past: TimeInPastPolicy,
    /// Policy applied when an event body panics
    pub failure_policy: FailurePolicy,
}

impl Default for DiscreteSchedulerConfig {
    fn default() -> Self {
        Self {
            name: "discrete".to_string(),
            start_time: 0.0,
            unit: None,
            time_in_past: TimeInPastPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// How a drain pass decides what to pop and when to unwind
#[derive(Clone, Copy)]
enum RunMode {
    /// Submission-triggered drain: unwinds on pause and when only daemon
    /// events remain
    Free,
    /// Paused-only bounded run up to an inclusive virtual-time bound
    Bounded(f64),
    /// Paused-only drain until only daemon events remain
    Completion,
}

struct DiscreteState {
    queue: BTreeMap<EventKey, Arc<Event>>,
    /// Resident non-daemon entries, cancelled ones included until they
    /// surface; zero means the scheduler is out of work
    non_daemon_resident: usize,
    paused: bool,
    running: bool,
    bounded: bool,
    stopped: bool,
}

struct DiscreteInner {
    name: String,
    tag: SchedulerTag,
    clock: VirtualTimeProvider,
    time_in_past: TimeInPastPolicy,
    seq: AtomicU64,
    failure: FailureRouter,
    state: Mutex<DiscreteState>,
}

/// Cooperative, single-thread-of-control, virtual-time event loop.
///
/// Submissions while the scheduler is idle and unpaused drain the queue on
/// the submitting thread; submissions made from inside a running event
/// enqueue and are picked up by the active loop. The clock advances to each
/// popped event's time and never moves backwards.
///
/// Cloning yields another handle onto the same scheduler.
#[derive(Clone)]
pub struct DiscreteEventScheduler {
    inner: Arc<DiscreteInner>,
}

impl DiscreteEventScheduler {
    /// Create a scheduler from configuration
    pub fn new(config: DiscreteSchedulerConfig) -> Self {
        let clock = match config.unit {
            Some(unit) => VirtualTimeProvider::with_unit(config.start_time, unit),
            None => VirtualTimeProvider::new(config.start_time),
        };
        Self {
            inner: Arc::new(DiscreteInner {
                name: config.name,
                tag: SchedulerTag::new(),
                clock,
                time_in_past: config.time_in_past,
                seq: AtomicU64::new(0),
                failure: FailureRouter::new(config.failure_policy),
                state: Mutex::new(DiscreteState {
                    queue: BTreeMap::new(),
                    non_daemon_resident: 0,
                    paused: false,
                    running: false,
                    bounded: false,
                    stopped: false,
                }),
            }),
        }
    }

    /// Create a paused scheduler; events accumulate until `unpause` or a
    /// bounded run. The usual starting point for simulations.
    pub fn new_paused(config: DiscreteSchedulerConfig) -> Self {
        let scheduler = Self::new(config);
        scheduler.inner.state.lock().paused = true;
        scheduler
    }

    /// The scheduler's adjustable clock
    pub fn time_provider(&self) -> &VirtualTimeProvider {
        &self.inner.clock
    }

    /// Current lifecycle state
    pub fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock();
        if state.stopped {
            SchedulerStatus::Stopped
        } else if state.running {
            SchedulerStatus::Running
        } else if state.paused {
            SchedulerStatus::Paused
        } else {
            SchedulerStatus::Idle
        }
    }

    /// Whether the scheduler is paused
    pub fn is_paused(&self) -> bool {
        let state = self.inner.state.lock();
        state.paused && !state.stopped
    }

    /// Request a pause. Callable from inside an event body: the flag is
    /// checked after the current event returns and the loop unwinds without
    /// advancing further.
    pub fn pause(&self) -> SchedulerResult<()> {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return Err(SchedulerError::IllegalState(
                "cannot pause a stopped scheduler".to_string(),
            ));
        }
        if state.bounded {
            return Err(SchedulerError::IllegalState(
                "cannot pause during a bounded run".to_string(),
            ));
        }
        if state.paused {
            return Err(SchedulerError::IllegalState(
                "scheduler is already paused".to_string(),
            ));
        }
        state.paused = true;
        debug!(scheduler = self.inner.name.as_str(), "paused");
        Ok(())
    }

    /// Clear the pause flag and resume draining from the caller's stack.
    pub fn unpause(&self) -> SchedulerResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Err(SchedulerError::IllegalState(
                    "cannot unpause a stopped scheduler".to_string(),
                ));
            }
            if state.bounded {
                return Err(SchedulerError::IllegalState(
                    "cannot unpause during a bounded run".to_string(),
                ));
            }
            if !state.paused {
                return Err(SchedulerError::IllegalState(
                    "scheduler is not paused".to_string(),
                ));
            }
            state.paused = false;
            if state.running {
                return Ok(());
            }
            state.running = true;
        }
        debug!(scheduler = self.inner.name.as_str(), "unpaused");
        self.drain(RunMode::Free);
        Ok(())
    }

    /// Run every event with `time <= now() + duration`, including events
    /// added during the run, then advance the clock to exactly that bound.
    /// Only valid while paused; the scheduler is still paused afterwards.
    pub fn run_for_duration(&self, duration: f64) -> SchedulerResult<()> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(SchedulerError::IllegalArgument(format!(
                "bounded run duration must be non-negative, got {duration}"
            )));
        }
        self.run_until_time(self.inner.clock.now() + duration)
    }

    /// Run every event with `time <= until`, including events added during
    /// the run, then advance the clock to exactly `until`. Only valid while
    /// paused; the scheduler is still paused afterwards.
    pub fn run_until_time(&self, until: f64) -> SchedulerResult<()> {
        self.begin_driven_run(Some(until))?;
        self.drain(RunMode::Bounded(until));
        self.inner.state.lock().bounded = false;
        Ok(())
    }

    /// Drain until only daemon events remain, advancing the clock freely.
    /// Only valid while paused; the scheduler is still paused afterwards.
    pub fn run_to_completion(&self) -> SchedulerResult<()> {
        self.begin_driven_run(None)?;
        self.drain(RunMode::Completion);
        self.inner.state.lock().bounded = false;
        Ok(())
    }

    /// Shared entry checks for the paused-only driven runs
    fn begin_driven_run(&self, bound: Option<f64>) -> SchedulerResult<()> {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return Err(SchedulerError::IllegalState(
                "scheduler is stopped".to_string(),
            ));
        }
        if state.bounded {
            return Err(SchedulerError::IllegalState(
                "bounded runs cannot be reentered".to_string(),
            ));
        }
        if state.running {
            return Err(SchedulerError::IllegalState(
                "bounded runs require a paused scheduler, but it is running".to_string(),
            ));
        }
        if !state.paused {
            return Err(SchedulerError::IllegalState(
                "bounded runs are only valid while paused".to_string(),
            ));
        }
        if let Some(until) = bound {
            let now = self.inner.clock.now();
            if !until.is_finite() || until < now {
                return Err(SchedulerError::IllegalArgument(format!(
                    "bounded run target {until} is behind current time {now}"
                )));
            }
        }
        state.bounded = true;
        state.running = true;
        Ok(())
    }

    /// Submission path shared by every public entry point. `time` of `None`
    /// means "the current time, read under the lock", which keeps `do_now`
    /// immune to a concurrently advancing clock. `source` is set when the
    /// submission arrives through a source-tracking wrapper.
    pub(crate) fn submit_tagged(
        &self,
        time: Option<f64>,
        description: &str,
        daemon: bool,
        source: Option<SchedulerTag>,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        let mut run_after = false;
        let handle = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Ok(None);
            }
            let now = self.inner.clock.now();
            let time = time.unwrap_or(now);
            if !time.is_finite() {
                return Err(SchedulerError::IllegalArgument(format!(
                    "event time must be finite, got {time}"
                )));
            }
            let time = if time < now {
                match self.inner.time_in_past {
                    TimeInPastPolicy::Fail => {
                        return Err(SchedulerError::TimeInPast {
                            requested: time,
                            now,
                        })
                    }
                    TimeInPastPolicy::Clamp => {
                        warn!(
                            scheduler = self.inner.name.as_str(),
                            requested = time,
                            now,
                            "submission in the past clamped to current time"
                        );
                        now
                    }
                }
            } else {
                time
            };
            let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
            let event = Event::new(time, seq, description, daemon, source, body);
            state.queue.insert(event.key(), event.clone());
            if !daemon {
                state.non_daemon_resident += 1;
            }
            if !state.paused && !state.running {
                state.running = true;
                run_after = true;
            }
            EventHandle::new(event)
        };
        if run_after {
            self.drain(RunMode::Free);
        }
        Ok(Some(handle))
    }

    /// Retime every queued event matching `predicate` to `new_time`,
    /// preserving their relative order with fresh sequence numbers. Used by
    /// the source-tracking wrapper's per-source pause.
    pub(crate) fn retime_matching(
        &self,
        predicate: impl Fn(&Event) -> bool,
        new_time: f64,
    ) {
        let mut state = self.inner.state.lock();
        let matching: Vec<EventKey> = state
            .queue
            .iter()
            .filter(|(_, event)| predicate(event))
            .map(|(key, _)| *key)
            .collect();
        for key in matching {
            if let Some(event) = state.queue.remove(&key) {
                let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
                event.retime(new_time, seq);
                state.queue.insert(event.key(), event);
            }
        }
    }

    /// Count queued events matching `predicate`
    pub(crate) fn count_matching(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        let state = self.inner.state.lock();
        state.queue.values().filter(|event| predicate(event)).count()
    }

    /// Whether every queued event matching `predicate` is a daemon
    pub(crate) fn daemons_only_matching(&self, predicate: impl Fn(&Event) -> bool) -> bool {
        let state = self.inner.state.lock();
        state
            .queue
            .values()
            .filter(|event| predicate(event))
            .all(|event| event.is_daemon())
    }

    /// The loop body: pop smallest `(time, seq)`, drop cancelled, advance
    /// the clock, invoke under the failure router.
    fn drain(&self, mode: RunMode) {
        loop {
            let event = {
                let mut state = self.inner.state.lock();
                if state.stopped {
                    state.running = false;
                    return;
                }
                match mode {
                    RunMode::Free if state.paused => {
                        state.running = false;
                        return;
                    }
                    RunMode::Free | RunMode::Completion if state.non_daemon_resident == 0 => {
                        state.running = false;
                        return;
                    }
                    RunMode::Bounded(bound) => {
                        let due = state
                            .queue
                            .first_key_value()
                            .is_some_and(|(key, _)| key.time <= bound);
                        if !due {
                            state.running = false;
                            drop(state);
                            self.inner.clock.advance_to(bound);
                            return;
                        }
                    }
                    _ => {}
                }
                match state.queue.pop_first() {
                    Some((_, event)) => {
                        if !event.is_daemon() {
                            state.non_daemon_resident -= 1;
                        }
                        event
                    }
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };
            if event.is_cancelled() {
                event.discard_body();
                continue;
            }
            let now = self.inner.clock.advance_to(event.time());
            if self.inner.failure.run_event(&event, now) {
                self.stop();
            }
        }
    }
}

impl EventScheduler for DiscreteEventScheduler {
    fn tag(&self) -> SchedulerTag {
        self.inner.tag
    }

    fn now(&self) -> f64 {
        self.inner.clock.now()
    }

    fn time_unit(&self) -> Option<TimeUnit> {
        self.inner.clock.unit()
    }

    fn do_at_boxed(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        self.submit_tagged(Some(time), description, daemon, None, body)
    }

    fn do_now_boxed(
        &self,
        description: &str,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        self.submit_tagged(None, description, false, None, body)
    }

    fn stop(&self) {
        let drained: Vec<Arc<Event>> = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.non_daemon_resident = 0;
            std::mem::take(&mut state.queue).into_values().collect()
        };
        for event in drained {
            event.discard_body();
        }
        debug!(scheduler = self.inner.name.as_str(), "stopped");
    }

    fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    fn queue_size(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn has_only_daemon_events(&self) -> bool {
        self.inner.state.lock().non_daemon_resident == 0
    }

    fn register_failure_listener(&self, listener: FailureListener) {
        self.inner.failure.register(listener);
    }
}
