//! Ring-buffer ready queue with spill list

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;
use crate::queue::{all_daemons, ReadyQueue, TimedHeap};

struct RingInner {
    slots: Box<[Option<Arc<Event>>]>,
    head: usize,
    count: usize,
    overflow: VecDeque<Arc<Event>>,
    future: TimedHeap,
}

impl RingInner {
    fn push_immediate(&mut self, event: Arc<Event>) {
        let capacity = self.slots.len();
        if self.count < capacity {
            let tail = (self.head + self.count) % capacity;
            self.slots[tail] = Some(event);
            self.count += 1;
        } else {
            self.overflow.push_back(event);
        }
    }

    fn pop_ring(&mut self) -> Option<Arc<Event>> {
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

    fn pop_overflow(&mut self) -> Option<Arc<Event>> {
        while let Some(event) = self.overflow.pop_front() {
            if event.is_cancelled() {
                event.discard_body();
                continue;
            }
            return Some(event);
        }
        None
    }

    fn ring_events(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.slots.iter().flatten()
    }
}

/// Fixed-capacity circular buffer for immediates, spilling to a list when
/// full; future work sits in a `(time, seq)` heap.
///
/// `next_due` polls the ring first, then the spill list once the ring has
/// emptied, then due future work. Cancelled entries keep their slot until
/// they surface and still count toward `len`.
pub struct RingBufferQueue {
    inner: Mutex<RingInner>,
}

impl RingBufferQueue {
    /// `size` is the ring capacity; `overflow` pre-sizes the spill list.
    pub fn new(size: usize, overflow: usize) -> Self {
        let capacity = size.max(1);
        Self {
            inner: Mutex::new(RingInner {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                count: 0,
                overflow: VecDeque::with_capacity(overflow),
                future: TimedHeap::default(),
            }),
        }
    }
}

impl ReadyQueue for RingBufferQueue {
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
        if let Some(event) = inner.pop_ring() {
            return Some(event);
        }
        if let Some(event) = inner.pop_overflow() {
            return Some(event);
        }
        inner.future.pop_due(now)
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.count + inner.overflow.len() + inner.future.len()
    }

    fn has_only_daemon_events(&self) -> bool {
        let inner = self.inner.lock();
        all_daemons(inner.ring_events().chain(inner.overflow.iter()))
            && all_daemons(inner.future.live_events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: f64, seq: u64) -> Arc<Event> {
        Event::new(time, seq, format!("e{seq}"), false, None, Box::new(|| {}))
    }

    #[test]
    fn test_fifo_within_ring() {
        let queue = RingBufferQueue::new(4, 0);
        for seq in 0..4 {
            queue.add_immediate(event(0.0, seq));
        }
        for seq in 0..4 {
            assert_eq!(queue.next_due(0.0).unwrap().seq(), seq);
        }
    }

    #[test]
    fn test_overflow_drains_after_ring_empties() {
        let queue = RingBufferQueue::new(2, 2);
        for seq in 0..5 {
            queue.add_immediate(event(0.0, seq));
        }
        assert_eq!(queue.len(), 5);
        // ring holds 0 and 1; 2..5 spilled
        for seq in 0..5 {
            assert_eq!(queue.next_due(0.0).unwrap().seq(), seq);
        }
        assert!(queue.next_due(0.0).is_none());
    }

    #[test]
    fn test_ring_wraps_after_partial_drain() {
        let queue = RingBufferQueue::new(3, 0);
        queue.add_immediate(event(0.0, 0));
        queue.add_immediate(event(0.0, 1));
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 0);

        queue.add_immediate(event(0.0, 2));
        queue.add_immediate(event(0.0, 3));
        for seq in 1..4 {
            assert_eq!(queue.next_due(0.0).unwrap().seq(), seq);
        }
    }

    #[test]
    fn test_cancelled_entry_occupies_slot_until_surfaced() {
        let queue = RingBufferQueue::new(4, 0);
        let doomed = event(0.0, 0);
        queue.add_immediate(doomed.clone());
        queue.add_immediate(event(0.0, 1));

        queue.remove(&doomed);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next_due(0.0).unwrap().seq(), 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_future_heap_removal_is_physical() {
        let queue = RingBufferQueue::new(4, 0);
        let doomed = event(10.0, 0);
        queue.add_scheduled(doomed.clone());
        queue.add_scheduled(event(20.0, 1));

        queue.remove(&doomed);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(20.0).unwrap().seq(), 1);
    }
}
