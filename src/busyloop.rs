//! Busy-loop scheduler
//!
//! A dedicated worker pinned to a spin loop for the lowest possible
//! dispatch latency: it polls one of the interchangeable ready-queue
//! disciplines against an external wall-clock provider and yields briefly
//! when nothing is due. Cancelled entries sitting mid-ring stay resident
//! until their slot surfaces and keep counting toward `queue_size`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::{Event, EventBody, EventHandle};
use crate::failure::{FailureListener, FailurePolicy, FailureRouter};
use crate::queue::{ReadyQueue, ReadyQueueKind};
use crate::scheduler::{EventScheduler, SchedulerTag};
use crate::time::{TimeProvider, TimeUnit};

/// Configuration for [`BusyLoopScheduler`]
#[derive(Debug, Clone)]
pub struct BusyLoopConfig {
    /// Name used for the worker thread and log output
    pub name: String,
    /// Ready-queue discipline serving the worker
    pub queue: ReadyQueueKind,
    /// Policy applied when an event body panics
    pub failure_policy: FailurePolicy,
}

impl Default for BusyLoopConfig {
    fn default() -> Self {
        Self {
            name: "busy-loop".to_string(),
            queue: ReadyQueueKind::Switching,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Counters exposed by the busy-loop worker
#[derive(Default)]
pub struct BusyLoopMetrics {
    /// Event bodies invoked
    pub executed: AtomicU64,
    /// Ready-queue polls
    pub polls: AtomicU64,
    /// Idle yields between polls
    pub yields: AtomicU64,
}

type StopNotifier = Box<dyn FnOnce() + Send>;

struct BusyInner {
    name: String,
    tag: SchedulerTag,
    provider: Arc<dyn TimeProvider>,
    queue: Box<dyn ReadyQueue>,
    seq: AtomicU64,
    failure: FailureRouter,
    stopped: AtomicBool,
    started: AtomicBool,
    metrics: BusyLoopMetrics,
    stop_notifier: Mutex<Option<StopNotifier>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    worker_done: Receiver<()>,
    done_tx: Mutex<Option<Sender<()>>>,
}

fn worker_loop(inner: &Arc<BusyInner>, _done: Sender<()>) {
    while !inner.stopped.load(Ordering::Acquire) {
        inner.metrics.polls.fetch_add(1, Ordering::Relaxed);
        match inner.queue.next_due(inner.provider.now()) {
            Some(event) => {
                inner.metrics.executed.fetch_add(1, Ordering::Relaxed);
                let now = inner.provider.now();
                if inner.failure.run_event(&event, now) {
                    inner.stopped.store(true, Ordering::Release);
                }
            }
            None => {
                inner.metrics.yields.fetch_add(1, Ordering::Relaxed);
                thread::yield_now();
            }
        }
    }
    if let Some(notifier) = inner.stop_notifier.lock().take() {
        notifier();
    }
    debug!(scheduler = inner.name.as_str(), "worker exited");
    // _done drops here; observers see the channel disconnect
}

/// Scheduler spinning a dedicated worker over a ready queue.
///
/// Cloning yields another handle onto the same scheduler.
#[derive(Clone)]
pub struct BusyLoopScheduler {
    inner: Arc<BusyInner>,
}

impl BusyLoopScheduler {
    /// Create the scheduler; the worker does not run until
    /// [`start`](Self::start).
    pub fn new(provider: Arc<dyn TimeProvider>, config: BusyLoopConfig) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        Self {
            inner: Arc::new(BusyInner {
                name: config.name,
                tag: SchedulerTag::new(),
                provider,
                queue: config.queue.build(),
                seq: AtomicU64::new(0),
                failure: FailureRouter::new(config.failure_policy),
                stopped: AtomicBool::new(false),
                started: AtomicBool::new(false),
                metrics: BusyLoopMetrics::default(),
                stop_notifier: Mutex::new(None),
                worker: Mutex::new(None),
                worker_done: done_rx,
                done_tx: Mutex::new(Some(done_tx)),
            }),
        }
    }

    /// Install a callback that runs on the worker as its last action after
    /// [`stop`](EventScheduler::stop).
    pub fn set_stop_notifier(&self, notifier: StopNotifier) {
        *self.inner.stop_notifier.lock() = Some(notifier);
    }

    /// Launch the worker thread. Fails if already started or stopped.
    pub fn start(&self) -> SchedulerResult<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::IllegalState(
                "scheduler is stopped".to_string(),
            ));
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::IllegalState(
                "scheduler is already started".to_string(),
            ));
        }
        let Some(done_tx) = self.inner.done_tx.lock().take() else {
            return Err(SchedulerError::IllegalState(
                "scheduler is already started".to_string(),
            ));
        };
        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.inner.name))
            .spawn({
                let inner = self.inner.clone();
                move || worker_loop(&inner, done_tx)
            })
            .map_err(|e| {
                SchedulerError::IllegalState(format!("failed to spawn worker thread: {e}"))
            })?;
        *self.inner.worker.lock() = Some(handle);
        debug!(scheduler = self.inner.name.as_str(), "started");
        Ok(())
    }

    /// Block until the worker thread has terminated, up to `timeout`.
    /// Returns `true` once it has.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        matches!(
            self.inner.worker_done.recv_timeout(timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        )
    }

    /// Worker counters
    pub fn metrics(&self) -> &BusyLoopMetrics {
        &self.inner.metrics
    }

    fn submit(
        &self,
        time: f64,
        description: &str,
        daemon: bool,
        immediate: bool,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Ok(None);
        }
        if !time.is_finite() {
            return Err(SchedulerError::IllegalArgument(format!(
                "event time must be finite, got {time}"
            )));
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let event = Event::new(time, seq, description, daemon, None, body);
        if immediate || time <= self.inner.provider.now() {
            self.inner.queue.add_immediate(event.clone());
        } else {
            self.inner.queue.add_scheduled(event.clone());
        }
        Ok(Some(EventHandle::new(event)))
    }
}

impl EventScheduler for BusyLoopScheduler {
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
        self.submit(time, description, daemon, false, body)
    }

    fn do_now_boxed(
        &self,
        description: &str,
        body: EventBody,
    ) -> SchedulerResult<Option<EventHandle>> {
        self.submit(self.inner.provider.now(), description, false, true, body)
    }

    fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(scheduler = self.inner.name.as_str(), "stop requested");
        let handle = self.inner.worker.lock().take();
        match handle {
            Some(handle) if thread::current().id() != handle.thread().id() => {
                let _ = handle.join();
            }
            Some(_) => {}
            None => {
                // never started: run the notifier here, there is no worker
                if let Some(notifier) = self.inner.stop_notifier.lock().take() {
                    notifier();
                }
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn queue_size(&self) -> usize {
        self.inner.queue.len()
    }

    fn has_only_daemon_events(&self) -> bool {
        self.inner.queue.has_only_daemon_events()
    }

    fn register_failure_listener(&self, listener: FailureListener) {
        self.inner.failure.register(listener);
    }
}
