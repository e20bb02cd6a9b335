//! Logical schedulers multiplexed onto one backing scheduler

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::discrete::DiscreteEventScheduler;
use crate::error::{SchedulerError, SchedulerResult};
use crate::event::{EventBody, EventHandle};
use crate::failure::FailureListener;
use crate::scheduler::{EventScheduler, SchedulerTag};
use crate::sourced::SourceTracker;
use crate::time::TimeUnit;

/// Builder for a family of logical schedulers sharing one backing
/// discrete scheduler and one [`SourceTracker`].
pub struct SourcedSchedulerFamily {
    backing: DiscreteEventScheduler,
    tracker: Arc<SourceTracker>,
}

impl SourcedSchedulerFamily {
    pub fn new(backing: DiscreteEventScheduler, tracker: Arc<SourceTracker>) -> Self {
        Self { backing, tracker }
    }

    /// Mint a logical scheduler with a fresh source tag.
    pub fn scheduler(&self, name: impl Into<String>) -> SchedulerResult<SourcedScheduler> {
        let name = name.into();
        let tag = SchedulerTag::new();
        self.tracker.register(tag, name.clone())?;
        Ok(SourcedScheduler {
            inner: Arc::new(SourcedInner {
                name,
                tag,
                backing: self.backing.clone(),
                tracker: self.tracker.clone(),
                state: Mutex::new(SourcedState {
                    phase: WrapperPhase::Active,
                    delay: None,
                }),
            }),
        })
    }

    /// The tracker shared by this family
    pub fn tracker(&self) -> &Arc<SourceTracker> {
        &self.tracker
    }

    /// The backing scheduler shared by this family
    pub fn backing(&self) -> &DiscreteEventScheduler {
        &self.backing
    }
}

/// Per-wrapper shutdown phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WrapperPhase {
    Active,
    /// `do_at` submissions return `Ok(None)`; `do_now` still succeeds so
    /// in-flight work can drain
    PreparingToStop,
    /// All submissions return `Ok(None)`; already-accepted events drain
    Stopped,
}

/// Open per-source pause window
#[derive(Debug, Clone, Copy)]
struct DelayWindow {
    until: f64,
    blocking: bool,
}

struct SourcedState {
    phase: WrapperPhase,
    delay: Option<DelayWindow>,
}

struct SourcedInner {
    name: String,
    tag: SchedulerTag,
    backing: DiscreteEventScheduler,
    tracker: Arc<SourceTracker>,
    state: Mutex<SourcedState>,
}

/// Restores the tracker register when an event body exits, panicking or not
struct TrackerGuard {
    tracker: Arc<SourceTracker>,
    previous: Option<SchedulerTag>,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.exit(self.previous);
    }
}

/// One logical scheduler of a family.
///
/// Presents the standard scheduler contract; every submission is forwarded
/// to the backing scheduler tagged with this wrapper's source, and the
/// tracker register holds that tag for exactly the duration of each event
/// body. Cloning yields another handle onto the same logical scheduler.
#[derive(Clone)]
pub struct SourcedScheduler {
    inner: Arc<SourcedInner>,
}

impl SourcedScheduler {
    /// This wrapper's name within the family
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Virtually pause this source until `until`.
    ///
    /// Queued future events of this source timed before `until` shift to
    /// `until`, preserving their relative order; submissions made while the
    /// window is open are lifted the same way. Other sources are untouched,
    /// and the currently executing event of this source runs to completion.
    ///
    /// With `blocking`, `do_now` submissions (including the running event's
    /// own) are deferred to `until` as well: from the outside the source is
    /// inactive until then. Without it, `do_now` work still runs
    /// immediately.
    pub fn delay_execution_until(&self, until: f64, blocking: bool) -> SchedulerResult<()> {
        let now = self.inner.backing.now();
        if !until.is_finite() {
            return Err(SchedulerError::IllegalArgument(format!(
                "pause bound must be finite, got {until}"
            )));
        }
        if until <= now {
            return Ok(());
        }
        self.inner.state.lock().delay = Some(DelayWindow { until, blocking });
        let tag = self.inner.tag;
        self.inner.backing.retime_matching(
            move |event| event.source() == Some(tag) && event.time() < until,
            until,
        );
        debug!(
            source = self.inner.name.as_str(),
            until, blocking, "source paused"
        );
        Ok(())
    }

    /// Stop accepting `do_at` submissions while letting `do_now` work drain.
    pub fn prepare_to_stop(&self) {
        let mut state = self.inner.state.lock();
        if state.phase == WrapperPhase::Active {
            state.phase = WrapperPhase::PreparingToStop;
            debug!(source = self.inner.name.as_str(), "preparing to stop");
        }
    }

    fn submit(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        via_do_now: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        let now = self.inner.backing.now();
        // None means "the backing scheduler's current time, read under its
        // lock", which keeps do_now safe against a concurrently moving clock
        let effective_time = {
            let mut state = self.inner.state.lock();
            match state.phase {
                WrapperPhase::Stopped => return Ok(None),
                WrapperPhase::PreparingToStop if !via_do_now => return Ok(None),
                _ => {}
            }
            if state.delay.is_some_and(|window| now >= window.until) {
                state.delay = None;
            }
            match state.delay {
                Some(window) if via_do_now => {
                    if window.blocking {
                        Some(window.until)
                    } else {
                        None
                    }
                }
                Some(window) if time < window.until => Some(window.until),
                _ if via_do_now => None,
                _ => Some(time),
            }
        };

        let tracker = self.inner.tracker.clone();
        let tag = self.inner.tag;
        let wrapped: EventBody = Box::new(move || {
            let _guard = TrackerGuard {
                previous: tracker.enter(tag),
                tracker,
            };
            body();
        });
        self.inner
            .backing
            .submit_tagged(effective_time, description, daemon, Some(tag), wrapped)
    }
}

impl EventScheduler for SourcedScheduler {
    fn tag(&self) -> SchedulerTag {
        self.inner.tag
    }

    fn now(&self) -> f64 {
        self.inner.backing.now()
    }

    fn time_unit(&self) -> Option<TimeUnit> {
        self.inner.backing.time_unit()
    }

    fn do_at_boxed(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        self.submit(time, description, daemon, false, body)
    }

    fn do_now_boxed(
        &self,
        description: &str,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        let now = self.inner.backing.now();
        self.submit(now, description, false, true, body)
    }

    /// Silence this wrapper. Already-accepted events keep draining through
    /// the backing scheduler, which stays alive for the other sources.
    fn stop(&self) {
        let mut state = self.inner.state.lock();
        if state.phase != WrapperPhase::Stopped {
            state.phase = WrapperPhase::Stopped;
            debug!(source = self.inner.name.as_str(), "stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.inner.state.lock().phase == WrapperPhase::Stopped
    }

    fn queue_size(&self) -> usize {
        let tag = self.inner.tag;
        self.inner
            .backing
            .count_matching(move |event| event.source() == Some(tag))
    }

    fn has_only_daemon_events(&self) -> bool {
        let tag = self.inner.tag;
        self.inner
            .backing
            .daemons_only_matching(move |event| event.source() == Some(tag))
    }

    fn register_failure_listener(&self, listener: FailureListener) {
        self.inner.backing.register_failure_listener(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discrete::DiscreteSchedulerConfig;

    fn family() -> SourcedSchedulerFamily {
        SourcedSchedulerFamily::new(
            DiscreteEventScheduler::new_paused(DiscreteSchedulerConfig::default()),
            Arc::new(SourceTracker::new()),
        )
    }

    #[test]
    fn test_tracker_reports_owning_source() {
        let family = family();
        let first = family.scheduler("first").unwrap();
        let second = family.scheduler("second").unwrap();
        let seen: Arc<Mutex<Vec<Option<SchedulerTag>>>> = Arc::new(Mutex::new(Vec::new()));

        for (wrapper, time) in [(&first, 50.0), (&second, 100.0), (&first, 150.0)] {
            let tracker = family.tracker().clone();
            let seen = seen.clone();
            wrapper
                .do_at(time, "observe", move || {
                    seen.lock().push(tracker.current());
                })
                .unwrap();
        }
        family.backing().run_until_time(200.0).unwrap();

        let observed = seen.lock();
        assert_eq!(*observed, vec![Some(first.tag()), Some(second.tag()), Some(first.tag())]);
        assert_eq!(family.tracker().current(), None);
    }

    #[test]
    fn test_non_blocking_pause_shifts_only_this_source() {
        let family = family();
        let paused = family.scheduler("paused").unwrap();
        let bystander = family.scheduler("bystander").unwrap();
        let fired: Arc<Mutex<Vec<(&'static str, f64)>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let wrapper = paused.clone();
            paused
                .do_at(10.0, "pause", move || {
                    wrapper.delay_execution_until(100.0, false).unwrap();
                })
                .unwrap();
        }
        for (wrapper, label) in [(&paused, "shifted"), (&bystander, "untouched")] {
            let backing = family.backing().clone();
            let fired = fired.clone();
            wrapper
                .do_at(50.0, label, move || {
                    fired.lock().push((label, backing.now()));
                })
                .unwrap();
        }
        family.backing().run_until_time(200.0).unwrap();

        assert_eq!(*fired.lock(), vec![("untouched", 50.0), ("shifted", 100.0)]);
    }

    #[test]
    fn test_blocking_pause_defers_do_now_from_running_event() {
        let family = family();
        let wrapper = family.scheduler("blocked").unwrap();
        let fired: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let inner = wrapper.clone();
            let backing = family.backing().clone();
            let fired = fired.clone();
            wrapper
                .do_at(10.0, "pause then do_now", move || {
                    inner.delay_execution_until(60.0, true).unwrap();
                    let backing = backing.clone();
                    let fired = fired.clone();
                    inner
                        .do_now("deferred", move || {
                            fired.lock().push(backing.now());
                        })
                        .unwrap();
                })
                .unwrap();
        }
        family.backing().run_until_time(100.0).unwrap();

        assert_eq!(*fired.lock(), vec![60.0]);
    }

    #[test]
    fn test_non_blocking_pause_leaves_do_now_immediate() {
        let family = family();
        let wrapper = family.scheduler("pausable").unwrap();
        let fired: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let inner = wrapper.clone();
            let backing = family.backing().clone();
            let fired = fired.clone();
            wrapper
                .do_at(10.0, "pause then do_now", move || {
                    inner.delay_execution_until(60.0, false).unwrap();
                    let backing = backing.clone();
                    let fired = fired.clone();
                    inner
                        .do_now("immediate", move || {
                            fired.lock().push(backing.now());
                        })
                        .unwrap();
                })
                .unwrap();
        }
        family.backing().run_until_time(100.0).unwrap();

        assert_eq!(*fired.lock(), vec![10.0]);
    }

    #[test]
    fn test_two_phase_shutdown_is_per_wrapper() {
        let family = family();
        let stopping = family.scheduler("stopping").unwrap();
        let surviving = family.scheduler("surviving").unwrap();
        let fired: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        stopping.prepare_to_stop();
        assert!(stopping.do_at(10.0, "rejected", || {}).unwrap().is_none());
        {
            let fired = fired.clone();
            assert!(stopping
                .do_now("drains", move || fired.lock().push("drains"))
                .unwrap()
                .is_some());
        }

        stopping.stop();
        assert!(stopping.is_stopped());
        assert!(stopping.do_now("silent", || {}).unwrap().is_none());

        {
            let fired = fired.clone();
            surviving
                .do_at(20.0, "other source lives", move || {
                    fired.lock().push("survivor")
                })
                .unwrap();
        }
        family.backing().run_until_time(50.0).unwrap();

        assert_eq!(*fired.lock(), vec!["drains", "survivor"]);
        assert!(!family.backing().is_stopped());
    }

    #[test]
    fn test_queue_size_is_per_source() {
        let family = family();
        let first = family.scheduler("first").unwrap();
        let second = family.scheduler("second").unwrap();

        first.do_at(10.0, "a", || {}).unwrap();
        first.do_at(20.0, "b", || {}).unwrap();
        second.do_at(30.0, "c", || {}).unwrap();

        assert_eq!(first.queue_size(), 2);
        assert_eq!(second.queue_size(), 1);
        assert_eq!(family.backing().queue_size(), 3);
    }

    #[test]
    fn test_pause_window_expires() {
        let family = family();
        let wrapper = family.scheduler("expiring").unwrap();
        let fired: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

        wrapper.delay_execution_until(30.0, false).unwrap();
        family.backing().run_until_time(40.0).unwrap();

        // window closed at 30; a later submission is not shifted
        {
            let backing = family.backing().clone();
            let fired = fired.clone();
            wrapper
                .do_at(45.0, "after window", move || {
                    fired.lock().push(backing.now());
                })
                .unwrap();
        }
        family.backing().run_until_time(50.0).unwrap();

        assert_eq!(*fired.lock(), vec![45.0]);
    }
}
