//! Current-source register

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::SchedulerTag;

/// Single-slot register holding the tag of the source whose event is
/// currently executing, plus the registry of tags known to one wrapper
/// family.
///
/// One tracker per family, passed in explicitly at construction so tests
/// can run several families without cross-talk. Writes are serialised by
/// the backing scheduler's single-thread discipline.
pub struct SourceTracker {
    current: Mutex<Option<SchedulerTag>>,
    registry: DashMap<SchedulerTag, String>,
}

impl SourceTracker {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            registry: DashMap::new(),
        }
    }

    /// The tag of the source currently executing an event, if any.
    ///
    /// Called from inside an event body, this answers "which logical
    /// scheduler am I on".
    pub fn current(&self) -> Option<SchedulerTag> {
        *self.current.lock()
    }

    /// Name registered for a tag
    pub fn name_of(&self, tag: SchedulerTag) -> Option<String> {
        self.registry.get(&tag).map(|entry| entry.value().clone())
    }

    /// Set the register on event entry, returning the previous value for
    /// restoration on exit.
    pub(crate) fn enter(&self, tag: SchedulerTag) -> Option<SchedulerTag> {
        self.current.lock().replace(tag)
    }

    /// Restore the register on event exit.
    pub(crate) fn exit(&self, previous: Option<SchedulerTag>) {
        *self.current.lock() = previous;
    }

    /// Register a tag. Two schedulers must never share a tag within one
    /// family.
    pub(crate) fn register(&self, tag: SchedulerTag, name: String) -> SchedulerResult<()> {
        if self.registry.insert(tag, name).is_some() {
            return Err(SchedulerError::IllegalState(format!(
                "scheduler tag {tag} registered twice"
            )));
        }
        Ok(())
    }
}

impl Default for SourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_exit_restores_previous() {
        let tracker = SourceTracker::new();
        let outer = SchedulerTag::new();
        let inner = SchedulerTag::new();

        assert_eq!(tracker.current(), None);

        let previous = tracker.enter(outer);
        assert_eq!(tracker.current(), Some(outer));

        let nested = tracker.enter(inner);
        assert_eq!(tracker.current(), Some(inner));
        tracker.exit(nested);
        assert_eq!(tracker.current(), Some(outer));

        tracker.exit(previous);
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let tracker = SourceTracker::new();
        let tag = SchedulerTag::new();

        tracker.register(tag, "first".to_string()).unwrap();
        assert!(tracker.register(tag, "second".to_string()).is_err());
        assert_eq!(tracker.name_of(tag).as_deref(), Some("first"));
    }
}
