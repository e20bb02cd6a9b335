//! Realtime executor scheduler
//!
//! One named worker thread over a delay queue: submissions translate the
//! requested virtual time into a wall-clock deadline, the worker sleeps on a
//! condition variable until the earliest `(time, seq)` entry is due, and new
//! submissions or cancellations interrupt the wait.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::{Event, EventBody, EventHandle, EventKey};
use crate::failure::{FailureListener, FailurePolicy, FailureRouter};
use crate::scheduler::{EventScheduler, SchedulerTag};
use crate::time::{TimeProvider, TimeUnit, WallClockTimeProvider};

/// Configuration for [`RealtimeExecutorScheduler`]
#[derive(Debug, Clone)]
pub struct RealtimeSchedulerConfig {
    /// Name used for the worker thread and log output
    pub name: String,
    /// Physically remove cancelled entries from the delay queue. Affects
    /// `queue_size` only; correctness is identical either way.
    pub remove_on_cancel: bool,
    /// Policy applied when an event body panics
    pub failure_policy: FailurePolicy,
}

impl Default for RealtimeSchedulerConfig {
    fn default() -> Self {
        Self {
            name: "realtime-executor".to_string(),
            remove_on_cancel: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Deadlines further out than this saturate; `Instant` arithmetic overflows
/// on absurd delays long before the entry could ever run.
const MAX_WALL_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

struct DelayedEntry {
    deadline: Instant,
    event: Arc<Event>,
}

struct RealtimeState {
    queue: BTreeMap<EventKey, DelayedEntry>,
    stopped: bool,
}

struct RealtimeInner {
    name: String,
    tag: SchedulerTag,
    provider: WallClockTimeProvider,
    seq: AtomicU64,
    failure: FailureRouter,
    state: Mutex<RealtimeState>,
    wakeup: Condvar,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    worker_done: Receiver<()>,
}

impl RealtimeInner {
    /// Raise the stop flag, discard pending entries and wake the worker.
    fn halt(&self) {
        let drained: Vec<Arc<Event>> = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.queue)
                .into_values()
                .map(|entry| entry.event)
                .collect()
        };
        for event in drained {
            event.discard_body();
        }
        self.wakeup.notify_all();
        debug!(scheduler = self.name.as_str(), "stopped");
    }

    /// Block until the earliest `(time, seq)` entry is due, then pop it.
    /// Returns `None` once stopped.
    fn next_due(&self) -> Option<Arc<Event>> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            let head = state
                .queue
                .first_key_value()
                .map(|(key, entry)| (*key, entry.deadline));
            match head {
                None => {
                    self.wakeup.wait(&mut state);
                }
                Some((key, deadline)) => {
                    if Instant::now() >= deadline {
                        return state.queue.remove(&key).map(|entry| entry.event);
                    }
                    let _ = self.wakeup.wait_until(&mut state, deadline);
                }
            }
        }
    }
}

fn worker_loop(inner: &Arc<RealtimeInner>, _done: Sender<()>) {
    while let Some(event) = inner.next_due() {
        if event.is_cancelled() {
            event.discard_body();
            continue;
        }
        let now = inner.provider.now();
        if inner.failure.run_event(&event, now) {
            inner.halt();
        }
    }
    // _done drops here; observers see the channel disconnect
}

/// Scheduler backed by a single delay-queue worker thread.
///
/// `do_at` submits with a wall-clock delay of `max(0, time - now())`;
/// entries run one at a time on the worker in `(time, seq)` order. `stop`
/// is quiet: post-stop submissions return `Ok(None)` and never run.
///
/// Cloning yields another handle onto the same scheduler.
#[derive(Clone)]
pub struct RealtimeExecutorScheduler {
    inner: Arc<RealtimeInner>,
    remove_on_cancel: bool,
}

impl RealtimeExecutorScheduler {
    /// Create the scheduler and launch its worker thread.
    pub fn new(
        provider: WallClockTimeProvider,
        config: RealtimeSchedulerConfig,
    ) -> SchedulerResult<Self> {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let inner = Arc::new(RealtimeInner {
            name: config.name.clone(),
            tag: SchedulerTag::new(),
            provider,
            seq: AtomicU64::new(0),
            failure: FailureRouter::new(config.failure_policy),
            state: Mutex::new(RealtimeState {
                queue: BTreeMap::new(),
                stopped: false,
            }),
            wakeup: Condvar::new(),
            worker: Mutex::new(None),
            worker_done: done_rx,
        });

        let handle = thread::Builder::new()
            .name(format!("{}-worker", config.name))
            .spawn({
                let inner = inner.clone();
                move || worker_loop(&inner, done_tx)
            })
            .map_err(|e| {
                SchedulerError::IllegalState(format!("failed to spawn worker thread: {e}"))
            })?;
        *inner.worker.lock() = Some(handle);

        Ok(Self {
            inner,
            remove_on_cancel: config.remove_on_cancel,
        })
    }

    /// Block until the worker thread has terminated, up to `timeout`.
    /// Returns `true` once it has.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        matches!(
            self.inner.worker_done.recv_timeout(timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        )
    }

    fn removal_hook(&self) -> crate::event::CancelHook {
        let weak: Weak<RealtimeInner> = Arc::downgrade(&self.inner);
        Arc::new(move |event: &Event| {
            if let Some(inner) = weak.upgrade() {
                let removed = inner.state.lock().queue.remove(&event.key());
                if removed.is_some() {
                    event.discard_body();
                    inner.wakeup.notify_all();
                }
            }
        })
    }
}

impl EventScheduler for RealtimeExecutorScheduler {
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
        let event = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Ok(None);
            }
            if !time.is_finite() {
                return Err(SchedulerError::IllegalArgument(format!(
                    "event time must be finite, got {time}"
                )));
            }
            let delay = self
                .inner
                .provider
                .wall_delay(time - self.inner.provider.now())
                .min(MAX_WALL_DELAY);
            let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
            let event = Event::new(time, seq, description, daemon, None, body);
            state.queue.insert(
                event.key(),
                DelayedEntry {
                    deadline: Instant::now() + delay,
                    event: event.clone(),
                },
            );
            event
        };
        self.inner.wakeup.notify_all();

        let handle = if self.remove_on_cancel {
            EventHandle::with_hook(event, self.removal_hook())
        } else {
            EventHandle::new(event)
        };
        Ok(Some(handle))
    }

    fn do_now_boxed(
        &self,
        description: &str,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        self.do_at_boxed(self.inner.provider.now(), description, false, body)
    }

    fn stop(&self) {
        self.inner.halt();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if thread::current().id() == handle.thread().id() {
                // failure-policy stop from inside an event body: the worker
                // unwinds on its own
                return;
            }
            let _ = handle.join();
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(
            self.inner.worker_done.try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }

    fn queue_size(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn has_only_daemon_events(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .queue
            .values()
            .filter(|entry| !entry.event.is_cancelled())
            .all(|entry| entry.event.is_daemon())
    }

    fn register_failure_listener(&self, listener: FailureListener) {
        self.inner.failure.register(listener);
    }
}
