//! Passive scheduler driven by explicit calls

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SchedulerResult;
use crate::event::{Event, EventBody, EventHandle, EventKey};
use crate::failure::{FailureListener, FailurePolicy, FailureRouter};
use crate::scheduler::{EventScheduler, SchedulerTag};
use crate::time::{TimeProvider, TimeUnit};

struct PassiveState {
    queue: BTreeMap<EventKey, Arc<Event>>,
    stopped: bool,
}

struct PassiveInner {
    name: String,
    tag: SchedulerTag,
    provider: Arc<dyn TimeProvider>,
    seq: AtomicU64,
    failure: FailureRouter,
    state: Mutex<PassiveState>,
}

/// A scheduler that never advances time and never runs on its own.
///
/// It observes an external time provider and executes queued work only when
/// told to: [`execute_overdue_events`](Self::execute_overdue_events) runs
/// everything due at the provider's current time,
/// [`execute_all_events`](Self::execute_all_events) runs everything queued
/// at the moment of the call regardless of time. Ordering, cancellation and
/// failure routing match the discrete scheduler. There is no past-time
/// rejection: the external clock is not under this scheduler's control.
#[derive(Clone)]
pub struct PassiveEventScheduler {
    inner: Arc<PassiveInner>,
}

impl PassiveEventScheduler {
    pub fn new(name: impl Into<String>, provider: Arc<dyn TimeProvider>) -> Self {
        Self::with_failure_policy(name, provider, FailurePolicy::default())
    }

    pub fn with_failure_policy(
        name: impl Into<String>,
        provider: Arc<dyn TimeProvider>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(PassiveInner {
                name: name.into(),
                tag: SchedulerTag::new(),
                provider,
                seq: AtomicU64::new(0),
                failure: FailureRouter::new(failure_policy),
                state: Mutex::new(PassiveState {
                    queue: BTreeMap::new(),
                    stopped: false,
                }),
            }),
        }
    }

    /// Run every queued event with `time <= now()`, in `(time, seq)` order,
    /// including due events added by the running ones. Returns the number of
    /// bodies invoked.
    pub fn execute_overdue_events(&self) -> usize {
        let now = self.inner.provider.now();
        self.execute_while(|key| key.time <= now)
    }

    /// Run everything queued at the moment of the call, in `(time, seq)`
    /// order regardless of time. Events submitted by the running bodies are
    /// left queued. Returns the number of bodies invoked.
    pub fn execute_all_events(&self) -> usize {
        let horizon = self.inner.seq.load(Ordering::Relaxed);
        self.execute_while(|key| key.seq < horizon)
    }

    /// Discard everything queued without running it.
    pub fn reset(&self) {
        let drained: Vec<Arc<Event>> = {
            let mut state = self.inner.state.lock();
            std::mem::take(&mut state.queue).into_values().collect()
        };
        for event in drained {
            event.discard_body();
        }
        debug!(scheduler = self.inner.name.as_str(), "reset");
    }

    fn execute_while(&self, eligible: impl Fn(&EventKey) -> bool) -> usize {
        let mut executed = 0;
        loop {
            let event = {
                let mut state = self.inner.state.lock();
                if state.stopped {
                    return executed;
                }
                match state.queue.first_key_value() {
                    Some((key, _)) if eligible(key) => {
                        let key = *key;
                        state.queue.remove(&key)
                    }
                    _ => return executed,
                }
            };
            let Some(event) = event else { return executed };
            if event.is_cancelled() {
                event.discard_body();
                continue;
            }
            executed += 1;
            if self
                .inner
                .failure
                .run_event(&event, self.inner.provider.now())
            {
                self.stop();
            }
        }
    }
}

impl EventScheduler for PassiveEventScheduler {
    fn tag(&self) -> SchedulerTag {
        self.inner.tag
    }

    fn now(&self) -> f64 {
        self.inner.provider.now()
    }

    fn time_unit(&self) -> Option<TimeUnit> {
        self.inner.provider.unit()
    }

    fn do_at_boxed(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return Ok(None);
        }
        if !time.is_finite() {
            return Err(crate::SchedulerError::IllegalArgument(format!(
                "event time must be finite, got {time}"
            )));
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let event = Event::new(time, seq, description, daemon, None, body);
        state.queue.insert(event.key(), event.clone());
        Ok(Some(EventHandle::new(event)))
    }

    fn do_now_boxed(
        &self,
        description: &str,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        self.do_at_boxed(self.inner.provider.now(), description, false, body)
    }

    fn stop(&self) {
        let drained: Vec<Arc<Event>> = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
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
        let state = self.inner.state.lock();
        state
            .queue
            .values()
            .filter(|event| !event.is_cancelled())
            .all(|event| event.is_daemon())
    }

    fn register_failure_listener(&self, listener: FailureListener) {
        self.inner.failure.register(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::VirtualTimeProvider;

    fn harness() -> (Arc<VirtualTimeProvider>, PassiveEventScheduler) {
        let clock = Arc::new(VirtualTimeProvider::new(0.0));
        let scheduler = PassiveEventScheduler::new("passive", clock.clone());
        (clock, scheduler)
    }

    #[test]
    fn test_overdue_execution_tracks_external_clock() {
        let (clock, scheduler) = harness();
        let log: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        for (seq, time) in [(0u64, 5.0), (1, 10.0), (2, 7.0)] {
            let log = log.clone();
            scheduler
                .do_at(time, "e", move || log.lock().push(seq))
                .unwrap();
        }

        assert_eq!(scheduler.execute_overdue_events(), 0);

        clock.set_time(7.0).unwrap();
        assert_eq!(scheduler.execute_overdue_events(), 2);
        assert_eq!(*log.lock(), vec![0, 2]);

        clock.set_time(10.0).unwrap();
        assert_eq!(scheduler.execute_overdue_events(), 1);
        assert_eq!(*log.lock(), vec![0, 2, 1]);
    }

    #[test]
    fn test_execute_all_ignores_time_but_keeps_order() {
        let (_clock, scheduler) = harness();
        let log: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        for (seq, time) in [(0u64, 50.0), (1, 10.0), (2, 30.0)] {
            let log = log.clone();
            scheduler
                .do_at(time, "e", move || log.lock().push(seq))
                .unwrap();
        }

        assert_eq!(scheduler.execute_all_events(), 3);
        assert_eq!(*log.lock(), vec![1, 2, 0]);
    }

    #[test]
    fn test_execute_all_leaves_newly_added_events_queued() {
        let (_clock, scheduler) = harness();
        {
            let inner = scheduler.clone();
            scheduler
                .do_at(1.0, "adder", move || {
                    inner.do_at(2.0, "added", || {}).unwrap();
                })
                .unwrap();
        }

        assert_eq!(scheduler.execute_all_events(), 1);
        assert_eq!(scheduler.queue_size(), 1);
    }

    #[test]
    fn test_reset_discards_queue() {
        let (_clock, scheduler) = harness();
        scheduler.do_at(1.0, "never", || {}).unwrap();
        scheduler.reset();
        assert_eq!(scheduler.queue_size(), 0);
        assert_eq!(scheduler.execute_all_events(), 0);
    }

    #[test]
    fn test_cancellation_skips_invocation() {
        let (clock, scheduler) = harness();
        let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handle = {
            let ran = ran.clone();
            scheduler
                .do_at(1.0, "maybe", move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
                .unwrap()
        };
        handle.cancel();

        clock.set_time(5.0).unwrap();
        assert_eq!(scheduler.execute_overdue_events(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
