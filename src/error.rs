//! Error types for the scheduling core

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised synchronously at submission or control-call time.
///
/// Failures inside event bodies are never surfaced through this enum; they
/// are routed to registered failure listeners instead (see
/// [`crate::failure`]).
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A unit-aware API was called on a scheduler whose time provider has no
    /// configured [`crate::time::TimeUnit`]
    #[error("scheduler has no time unit; instant/duration APIs are unavailable")]
    TimeUnitNotSpecified,

    /// Attempt to schedule before the scheduler's current time
    #[error("cannot schedule at {requested} before current time {now}")]
    TimeInPast { requested: f64, now: f64 },

    /// Invalid argument (non-positive period, negative duration, past bound)
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Operation invalid in the scheduler's current state
    #[error("illegal state: {0}")]
    IllegalState(String),
}
