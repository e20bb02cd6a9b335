//! Single-heap ready queue, the correctness baseline

use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;
use crate::queue::{all_daemons, ReadyQueue, TimedHeap};

/// One `(time, seq)` min-heap holding immediates and future work together.
///
/// The simplest discipline; the parameterised queue suite compares the other
/// three against it.
pub struct PriorityReadyQueue {
    heap: Mutex<TimedHeap>,
}

impl PriorityReadyQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(TimedHeap::default()),
        }
    }
}

impl Default for PriorityReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue for PriorityReadyQueue {
    fn add_immediate(&self, event: Arc<Event>) {
        self.heap.lock().push(event, false);
    }

    fn add_scheduled(&self, event: Arc<Event>) {
        self.heap.lock().push(event, true);
    }

    fn remove(&self, event: &Arc<Event>) {
        self.heap.lock().remove(event);
    }

    fn next_due(&self, now: f64) -> Option<Arc<Event>> {
        self.heap.lock().pop_due(now)
    }

    fn len(&self) -> usize {
        self.heap.lock().len()
    }

    fn has_only_daemon_events(&self) -> bool {
        all_daemons(self.heap.lock().live_events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: f64, seq: u64, daemon: bool) -> Arc<Event> {
        Event::new(time, seq, format!("e{seq}"), daemon, None, Box::new(|| {}))
    }

    #[test]
    fn test_orders_by_time_then_seq() {
        let queue = PriorityReadyQueue::new();
        queue.add_scheduled(event(3.0, 2, false));
        queue.add_scheduled(event(1.0, 1, false));
        queue.add_scheduled(event(1.0, 0, false));

        assert_eq!(queue.next_due(5.0).unwrap().seq(), 0);
        assert_eq!(queue.next_due(5.0).unwrap().seq(), 1);
        assert_eq!(queue.next_due(5.0).unwrap().seq(), 2);
        assert!(queue.next_due(5.0).is_none());
    }

    #[test]
    fn test_immediate_beats_scheduled_at_same_time() {
        let queue = PriorityReadyQueue::new();
        queue.add_scheduled(event(5.0, 1, false));
        queue.add_immediate(event(5.0, 9, false));

        assert_eq!(queue.next_due(5.0).unwrap().seq(), 9);
        assert_eq!(queue.next_due(5.0).unwrap().seq(), 1);
    }

    #[test]
    fn test_cancelled_events_are_skipped_and_dropped() {
        let queue = PriorityReadyQueue::new();
        let doomed = event(1.0, 0, false);
        queue.add_scheduled(doomed.clone());
        queue.add_scheduled(event(2.0, 1, false));
        doomed.cancel();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_due(5.0).unwrap().seq(), 1);
        assert!(queue.next_due(5.0).is_none());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_daemon_residue() {
        let queue = PriorityReadyQueue::new();
        queue.add_scheduled(event(1.0, 0, true));
        assert!(queue.has_only_daemon_events());

        queue.add_scheduled(event(2.0, 1, false));
        assert!(!queue.has_only_daemon_events());
    }
}
