//! Scheduled event record and cancellation handle
//!
//! An [`Event`] is the immutable description of one unit of scheduled work:
//! its virtual time, a monotonic insertion sequence, a human-readable
//! description, the callable body, and a daemon flag. Identity is `Arc`
//! pointer identity; the `(time, seq)` ordering key never collapses two
//! distinct events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::scheduler::SchedulerTag;

/// Callable body of an event. Runs at most once, with no arguments.
pub type EventBody = Box<dyn FnOnce() + Send + 'static>;

/// Ordering key for ranking events: time ascending, then insertion sequence.
///
/// Two events scheduled for the same time run in insertion order.
#[derive(Debug, Clone, Copy)]
pub struct EventKey {
    /// Scheduled virtual time
    pub time: f64,
    /// Monotonic insertion sequence
    pub seq: u64,
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        self.time.total_cmp(&other.time).is_eq() && self.seq == other.seq
    }
}

impl Eq for EventKey {}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// One scheduled unit of work.
///
/// Time and sequence are stored as atomics solely so the owning scheduler
/// can retime a queued event under its lock (per-source virtual pause);
/// outside that path the record is immutable.
pub struct Event {
    /// Scheduled virtual time, as `f64` bits
    time: AtomicU64,
    /// Insertion sequence, unique within the owning scheduler
    seq: AtomicU64,
    /// Human-readable description, carried into failure reports
    description: String,
    /// Daemon events do not keep the scheduler alive
    daemon: bool,
    /// Source tag, set when the event was submitted through a
    /// source-tracking wrapper
    source: Option<SchedulerTag>,
    /// Monotonic false-to-true cancellation flag
    cancelled: AtomicBool,
    /// Body, taken exactly once at invocation
    body: Mutex<Option<EventBody>>,
}

impl Event {
    pub(crate) fn new(
        time: f64,
        seq: u64,
        description: impl Into<String>,
        daemon: bool,
        source: Option<SchedulerTag>,
        body: EventBody,
    ) -> Arc<Self> {
        Arc::new(Self {
            time: AtomicU64::new(time.to_bits()),
            seq: AtomicU64::new(seq),
            description: description.into(),
            daemon,
            source,
            cancelled: AtomicBool::new(false),
            body: Mutex::new(Some(body)),
        })
    }

    /// Ordering key `(time, seq)`
    pub fn key(&self) -> EventKey {
        EventKey {
            time: self.time(),
            seq: self.seq(),
        }
    }

    /// Scheduled virtual time
    pub fn time(&self) -> f64 {
        f64::from_bits(self.time.load(Ordering::Acquire))
    }

    /// Insertion sequence
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Shift a queued event to a later time with a fresh sequence. Only the
    /// owning scheduler calls this, under its lock, with the event removed
    /// from the queue.
    pub(crate) fn retime(&self, time: f64, seq: u64) {
        self.time.store(time.to_bits(), Ordering::Release);
        self.seq.store(seq, Ordering::Release);
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether this event's presence keeps the scheduler alive
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Source tag, if the event was submitted through a wrapper
    pub fn source(&self) -> Option<SchedulerTag> {
        self.source
    }

    /// Mark the event cancelled. Idempotent; cancelling an event that has
    /// already fired is a no-op.
    pub fn cancel(&self) {
        let _ = self.mark_cancelled();
    }

    /// Set the cancellation flag, reporting whether this call made the
    /// false-to-true transition.
    pub(crate) fn mark_cancelled(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Check the cancellation flag
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Take the body for invocation. Returns `None` if the event already
    /// fired or was cancelled after its body was discarded.
    pub(crate) fn take_body(&self) -> Option<EventBody> {
        self.body.lock().take()
    }

    /// Drop the body without running it (discard at shutdown).
    pub(crate) fn discard_body(&self) {
        *self.body.lock() = None;
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("time", &self.time())
            .field("seq", &self.seq())
            .field("description", &self.description)
            .field("daemon", &self.daemon)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Hook invoked when a handle is cancelled, used by schedulers that
/// physically remove cancelled entries from their queue.
pub(crate) type CancelHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Narrow capability bound to a single scheduled event: cancel it, or ask
/// whether it has been cancelled.
///
/// The handle can be cloned and shared across threads. After `cancel`
/// returns, the event's body will not be invoked; if the body was already
/// running, it completes.
#[derive(Clone)]
pub struct EventHandle {
    event: Arc<Event>,
    on_cancel: Option<CancelHook>,
}

impl EventHandle {
    pub(crate) fn new(event: Arc<Event>) -> Self {
        Self {
            event,
            on_cancel: None,
        }
    }

    pub(crate) fn with_hook(event: Arc<Event>, on_cancel: CancelHook) -> Self {
        Self {
            event,
            on_cancel: Some(on_cancel),
        }
    }

    /// Cancel the event. Idempotent; a no-op if the event already fired.
    pub fn cancel(&self) {
        if self.event.mark_cancelled() {
            if let Some(hook) = &self.on_cancel {
                hook(&self.event);
            }
        }
    }

    /// Whether the event has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.event.is_cancelled()
    }

    /// Description of the underlying event
    pub fn description(&self) -> &str {
        self.event.description()
    }

    /// Scheduled time of the underlying event
    pub fn scheduled_time(&self) -> f64 {
        self.event.time()
    }

    pub(crate) fn event(&self) -> &Arc<Event> {
        &self.event
    }
}

impl std::fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandle")
            .field("event", &self.event)
            .finish()
    }
}
