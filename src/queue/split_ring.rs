//! Split ring-buffer ready queue

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;
use crate::queue::{all_daemons, ReadyQueue, TimedHeap};

struct Half {
    slots: Box<[Option<Arc<Event>>]>,
    head: usize,
    count: usize,
}

impl Half {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, event: Arc<Event>) -> Result<(), Arc<Event>> {
        let capacity = self.slots.len();
        if self.count == capacity {
            return Err(event);
        }
        let tail = (self.head + self.count) % capacity;
        self.slots[tail] = Some(event);
        self.count += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Arc<Event>> {
        while self.count > 0 {
            let event = self.slots[self.head].take();
            self.head = (self.head + 1) % self.slots.len();
            self.count -= 1;
            match event {
                Some(event) if event.is_cancelled() => event.discard_body(),
                Some(event) => return Some(event),
                None => {}
            }
        }
        None
    }

    fn events(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.slots.iter().flatten()
    }
}

struct SplitInner {
    halves: [Half; 2],
    /// Index of the half the consumer is draining; producers fill the other
    consumer: usize,
    overflow: VecDeque<Arc<Event>>,
    future: TimedHeap,
}

impl SplitInner {
    fn push_immediate(&mut self, event: Arc<Event>) {
        let producer = 1 - self.consumer;
        if let Err(event) = self.halves[producer].push(event) {
            self.overflow.push_back(event);
        }
    }

    fn pop_immediate(&mut self) -> Option<Arc<Event>> {
        if let Some(event) = self.halves[self.consumer].pop() {
            return Some(event);
        }
        // consumer half dry: take over the producer half
        self.consumer = 1 - self.consumer;
        if let Some(event) = self.halves[self.consumer].pop() {
            return Some(event);
        }
        while let Some(event) = self.overflow.pop_front() {
            if event.is_cancelled() {
                event.discard_body();
                continue;
            }
            return Some(event);
        }
        None
    }
}

/// Ring partitioned into a producer half and a consumer half.
///
/// Submitting threads fill one half while the worker drains the other;
/// the halves swap when the consumer's side runs dry, so the two sides
/// rarely share cache lines. Overflow spills to a list, future work to a
/// `(time, seq)` heap.
pub struct SplitRingBufferQueue {
    inner: Mutex<SplitInner>,
}

impl SplitRingBufferQueue {
    /// `size` is the total ring capacity; each half gets `size / 2` slots.
    pub fn new(size: usize) -> Self {
        let half = (size / 2).max(1);
        Self {
            inner: Mutex::new(SplitInner {
                halves: [Half::with_capacity(half), Half::with_capacity(half)],
                consumer: 0,
                overflow: VecDeque::new(),
                future: TimedHeap::default(),
            }),
        }
    }
}

impl ReadyQueue for SplitRingBufferQueue {
    fn add_immediate(&self, event: Arc<Event>) {
        self.inner.lock().push_immediate(event);
    }

    fn add_scheduled(&self, event: Arc<Event>) {
        self.inner.lock().future.push(event, true);
    }

    fn remove(&self, event: &Arc<Event>) {
        let mut inner = self.inner.lock();
        // ring and spill entries are only dropped when they surface
        event.cancel();
        inner.future.remove(event);
    }

    fn next_due(&self, now: f64) -> Option<Arc<Event>> {
        let mut inner = self.inner.lock();
        if let Some(event) = inner.pop_immediate() {
            return Some(event);
        }
        inner.future.pop_due(now)
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.halves[0].count + inner.halves[1].count + inner.overflow.len() + inner.future.len()
    }

    fn has_only_daemon_events(&self) -> bool {
        let inner = self.inner.lock();
        all_daemons(
            inner.halves[0]
                .events()
                .chain(inner.halves[1].events())
                .chain(inner.overflow.iter()),
        ) && all_daemons(inner.future.live_events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: f64, seq: u64) -> Arc<Event> {
        Event::new(time, seq, format!("e{seq}"), false, None, Box::new(|| {}))
    }

    #[test]
    fn test_fifo_across_half_swaps() {
        let queue = SplitRingBufferQueue::new(4);
        for seq in 0..4 {
            queue.add_immediate(event(0.0, seq));
        }
        for seq in 0..4 {
            assert_eq!(queue.next_due(0.0).unwrap().seq(), seq);
        }
        assert!(queue.next_due(0.0).is_none());
    }

    #[test]
    fn test_interleaved_produce_and_consume() {
        let queue = SplitRingBufferQueue::new(4);
        queue.add_immediate(event(0.0, 0));
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 0);

        queue.add_immediate(event(0.0, 1));
        queue.add_immediate(event(0.0, 2));
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 1);
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 2);
    }

    #[test]
    fn test_overflow_spills_and_drains_last() {
        let queue = SplitRingBufferQueue::new(2);
        for seq in 0..5 {
            queue.add_immediate(event(0.0, seq));
        }
        assert_eq!(queue.len(), 5);
        let mut seen = Vec::new();
        while let Some(e) = queue.next_due(0.0) {
            seen.push(e.seq());
        }
        // producer half holds one slot, so 0 lands in the ring and the rest
        // follow through swap + spill in insertion order
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cancelled_entries_surface_uninvoked() {
        let queue = SplitRingBufferQueue::new(4);
        let doomed = event(0.0, 0);
        queue.add_immediate(doomed.clone());
        queue.add_immediate(event(0.0, 1));
        queue.remove(&doomed);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_future_work_respects_due_time() {
        let queue = SplitRingBufferQueue::new(4);
        queue.add_scheduled(event(10.0, 0));
        assert!(queue.next_due(9.0).is_none());
        assert_eq!(queue.next_due(10.0).unwrap().seq(), 0);
    }
}
