//! Ready queues for the busy-loop scheduler
//!
//! Four interchangeable disciplines with different performance/ordering
//! trade-offs serve the busy-loop dispatcher:
//! - [`SwitchingQueue`]: write/read immediate lists swapped on drain, heap
//!   for future work; minimises producer/consumer contention
//! - [`PriorityReadyQueue`]: one `(time, seq)` min-heap; the correctness
//!   baseline the other disciplines are tested against
//! - [`RingBufferQueue`]: fixed-capacity ring of immediates with a spill
//!   list, heap for future work
//! - [`SplitRingBufferQueue`]: ring partitioned into producer/consumer
//!   halves to reduce cache ping-pong
//!
//! Shared rules: an event is due when `time <= now`; immediates drain ahead
//! of scheduled work at the same effective time; insertion order holds
//! within each bucket; `next_due` skips and drops cancelled events; ring
//! variants defer physical removal of cancelled entries until they surface,
//! so such entries still count toward `len` until their slot is polled.

pub mod priority;
pub mod ring;
pub mod split_ring;
pub mod switching;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::Event;

pub use priority::PriorityReadyQueue;
pub use ring::RingBufferQueue;
pub use split_ring::SplitRingBufferQueue;
pub use switching::SwitchingQueue;

/// A due-now/future event store polled by the busy-loop worker.
///
/// Implementations synchronise internally: submitters push from arbitrary
/// threads while the worker polls.
pub trait ReadyQueue: Send + Sync {
    /// Push an event whose time equals the current time
    fn add_immediate(&self, event: Arc<Event>);

    /// Push a future event
    fn add_scheduled(&self, event: Arc<Event>);

    /// Remove an event. Ring variants may defer physical removal until the
    /// entry surfaces; the entry then keeps counting toward [`len`](Self::len).
    fn remove(&self, event: &Arc<Event>);

    /// Pop the next event due at `now`, skipping and dropping cancelled
    /// entries. Returns `None` when nothing is due.
    fn next_due(&self, now: f64) -> Option<Arc<Event>>;

    /// Number of resident entries, including cancelled ones not yet surfaced
    fn len(&self) -> usize;

    /// Whether the queue holds nothing at all
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every residual live event is a daemon
    fn has_only_daemon_events(&self) -> bool;
}

/// Factory selecting a ready-queue discipline for the busy-loop scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ReadyQueueKind {
    /// Write/read list pair for immediates, heap for future work
    Switching,
    /// Single `(time, seq)` min-heap
    Priority,
    /// Ring of immediates with a spill list; `size` is the ring capacity,
    /// `overflow` the spill list's initial capacity
    RingBuffer { size: usize, overflow: usize },
    /// Ring split into producer/consumer halves; `size` is the total ring
    /// capacity across both halves
    SplitRingBuffer { size: usize },
}

impl ReadyQueueKind {
    /// Build a queue of this discipline
    pub fn build(&self) -> Box<dyn ReadyQueue> {
        match *self {
            ReadyQueueKind::Switching => Box::new(SwitchingQueue::new()),
            ReadyQueueKind::Priority => Box::new(PriorityReadyQueue::new()),
            ReadyQueueKind::RingBuffer { size, overflow } => {
                Box::new(RingBufferQueue::new(size, overflow))
            }
            ReadyQueueKind::SplitRingBuffer { size } => {
                Box::new(SplitRingBufferQueue::new(size))
            }
        }
    }
}

/// Ranking used inside the queue heaps: time ascending, immediates ahead of
/// scheduled work at equal time, then insertion order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RankKey {
    time: f64,
    scheduled: bool,
    seq: u64,
}

impl RankKey {
    fn of(event: &Event, scheduled: bool) -> Self {
        Self {
            time: event.time(),
            scheduled,
            seq: event.seq(),
        }
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for RankKey {}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.scheduled.cmp(&other.scheduled))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

pub(crate) struct HeapEntry {
    rank: RankKey,
    event: Arc<Event>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank.cmp(&other.rank))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank.cmp(&other.rank)
    }
}

/// Min-heap of timed events shared by the disciplines that keep future work
/// apart from their immediate lane.
#[derive(Default)]
pub(crate) struct TimedHeap {
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl TimedHeap {
    pub(crate) fn push(&mut self, event: Arc<Event>, scheduled: bool) {
        self.heap.push(Reverse(HeapEntry {
            rank: RankKey::of(&event, scheduled),
            event,
        }));
    }

    /// Pop the next due event, dropping cancelled entries along the way.
    pub(crate) fn pop_due(&mut self, now: f64) -> Option<Arc<Event>> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.rank.time.total_cmp(&now).is_gt() {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            if entry.event.is_cancelled() {
                entry.event.discard_body();
                continue;
            }
            return Some(entry.event);
        }
        None
    }

    /// Physically remove an event by identity.
    pub(crate) fn remove(&mut self, event: &Arc<Event>) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        entries.retain(|Reverse(entry)| !Arc::ptr_eq(&entry.event, event));
        self.heap = entries.into();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn live_events(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.heap
            .iter()
            .map(|Reverse(entry)| &entry.event)
            .filter(|event| !event.is_cancelled())
    }
}

/// Daemon check shared by the disciplines: every live event is a daemon.
pub(crate) fn all_daemons<'a>(events: impl Iterator<Item = &'a Arc<Event>>) -> bool {
    events.filter(|e| !e.is_cancelled()).all(|e| e.is_daemon())
}
