//! Failure routing for event bodies
//!
//! Every event invocation is wrapped so that a panic inside the body is
//! captured with the event's description, delivered to each registered
//! failure listener in registration order, and — depending on the
//! scheduler's policy — stops the scheduler. Failures never propagate to
//! the submitter.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::event::Event;

/// A captured failure from an event body
#[derive(Debug, Clone)]
pub struct EventFailure {
    /// Description of the failing event
    pub description: String,
    /// Panic message
    pub message: String,
    /// Scheduler time at which the event ran
    pub time: f64,
}

impl std::fmt::Display for EventFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event '{}' failed at t={}: {}",
            self.description, self.time, self.message
        )
    }
}

/// Sink for uncaught failures from event bodies
pub type FailureListener = Arc<dyn Fn(&EventFailure) + Send + Sync>;

/// What the scheduler does after an event body fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Transition to `Stopped` after notifying listeners
    #[default]
    StopScheduler,
    /// Keep running; the failed event is dropped
    Continue,
}

/// Listener registry shared by all scheduler variants.
///
/// Write-rare, read-often: registration takes the write lock, every event
/// invocation takes the read lock only on the failure path.
pub(crate) struct FailureRouter {
    listeners: RwLock<Vec<FailureListener>>,
    policy: FailurePolicy,
}

impl FailureRouter {
    pub(crate) fn new(policy: FailurePolicy) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub(crate) fn register(&self, listener: FailureListener) {
        self.listeners.write().push(listener);
    }

    /// Invoke `event`'s body, routing any panic. Returns `true` when the
    /// failure is fatal and the scheduler should stop.
    pub(crate) fn run_event(&self, event: &Arc<Event>, time: f64) -> bool {
        let Some(body) = event.take_body() else {
            return false;
        };

        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(()) => false,
            Err(payload) => {
                let failure = EventFailure {
                    description: event.description().to_string(),
                    message: panic_message(payload),
                    time,
                };
                warn!(event = failure.description.as_str(), time, message = failure.message.as_str(), "event body failed");
                for listener in self.listeners.read().iter() {
                    listener(&failure);
                }
                self.policy == FailurePolicy::StopScheduler
            }
        }
    }
}

/// Best-effort extraction of a panic payload into text
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
