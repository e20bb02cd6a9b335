//! Switching ready queue: write/read list pair for immediates

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;
use crate::queue::{all_daemons, ReadyQueue, TimedHeap};

/// Immediate lane split into a writer list and a reader list.
///
/// Producers append to the write side under its own lock; the consumer
/// drains the read side and swaps the two only when it empties, so a
/// producer and the polling worker rarely touch the same lock. Future work
/// sits in a `(time, seq)` heap.
pub struct SwitchingQueue {
    write: Mutex<VecDeque<Arc<Event>>>,
    read: Mutex<VecDeque<Arc<Event>>>,
    future: Mutex<TimedHeap>,
}

impl SwitchingQueue {
    pub fn new() -> Self {
        Self {
            write: Mutex::new(VecDeque::new()),
            read: Mutex::new(VecDeque::new()),
            future: Mutex::new(TimedHeap::default()),
        }
    }

    /// Pop the next live immediate, swapping lanes when the read side runs
    /// dry.
    fn pop_immediate(&self) -> Option<Arc<Event>> {
        let mut read = self.read.lock();
        loop {
            if read.is_empty() {
                let mut write = self.write.lock();
                if write.is_empty() {
                    return None;
                }
                std::mem::swap(&mut *read, &mut *write);
            }
            while let Some(event) = read.pop_front() {
                if event.is_cancelled() {
                    event.discard_body();
                    continue;
                }
                return Some(event);
            }
        }
    }
}

impl Default for SwitchingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue for SwitchingQueue {
    fn add_immediate(&self, event: Arc<Event>) {
        self.write.lock().push_back(event);
    }

    fn add_scheduled(&self, event: Arc<Event>) {
        self.future.lock().push(event, true);
    }

    fn remove(&self, event: &Arc<Event>) {
        // lock order matches the drain path: read before write
        let mut read = self.read.lock();
        let mut write = self.write.lock();
        read.retain(|resident| !Arc::ptr_eq(resident, event));
        write.retain(|resident| !Arc::ptr_eq(resident, event));
        drop(write);
        drop(read);
        self.future.lock().remove(event);
    }

    fn next_due(&self, now: f64) -> Option<Arc<Event>> {
        if let Some(event) = self.pop_immediate() {
            return Some(event);
        }
        self.future.lock().pop_due(now)
    }

    fn len(&self) -> usize {
        self.read.lock().len() + self.write.lock().len() + self.future.lock().len()
    }

    fn has_only_daemon_events(&self) -> bool {
        let read = self.read.lock();
        let write = self.write.lock();
        all_daemons(read.iter().chain(write.iter()))
            && all_daemons(self.future.lock().live_events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: f64, seq: u64) -> Arc<Event> {
        Event::new(time, seq, format!("e{seq}"), false, None, Box::new(|| {}))
    }

    #[test]
    fn test_immediates_drain_in_insertion_order() {
        let queue = SwitchingQueue::new();
        for seq in 0..5 {
            queue.add_immediate(event(0.0, seq));
        }
        for seq in 0..5 {
            assert_eq!(queue.next_due(0.0).unwrap().seq(), seq);
        }
        assert!(queue.next_due(0.0).is_none());
    }

    #[test]
    fn test_swap_preserves_order_across_interleaved_pushes() {
        let queue = SwitchingQueue::new();
        queue.add_immediate(event(0.0, 0));
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 0);

        // pushed after a drain started a fresh write lane
        queue.add_immediate(event(0.0, 1));
        queue.add_immediate(event(0.0, 2));
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 1);
        queue.add_immediate(event(0.0, 3));
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 2);
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 3);
    }

    #[test]
    fn test_immediates_beat_due_scheduled_work() {
        let queue = SwitchingQueue::new();
        queue.add_scheduled(event(1.0, 0));
        queue.add_immediate(event(2.0, 1));

        assert_eq!(queue.next_due(2.0).unwrap().seq(), 1);
        assert_eq!(queue.next_due(2.0).unwrap().seq(), 0);
    }

    #[test]
    fn test_future_work_waits_for_due_time() {
        let queue = SwitchingQueue::new();
        queue.add_scheduled(event(10.0, 0));
        assert!(queue.next_due(9.0).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(10.0).unwrap().seq(), 0);
    }

    #[test]
    fn test_cancelled_immediate_dropped_on_surface() {
        let queue = SwitchingQueue::new();
        let doomed = event(0.0, 0);
        queue.add_immediate(doomed.clone());
        queue.add_immediate(event(0.0, 1));
        doomed.cancel();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_due(0.0).unwrap().seq(), 1);
        assert_eq!(queue.len(), 0);
    }
}
