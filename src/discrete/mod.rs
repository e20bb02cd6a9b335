//! Virtual-time discrete schedulers
//!
//! [`DiscreteEventScheduler`] is the cooperative, single-thread-of-control
//! event loop: it orders events under `(time, seq)`, advances its virtual
//! clock as it pops them, and honours pause/resume, bounded runs, and the
//! daemon-based out-of-work rule. [`PassiveEventScheduler`] shares the
//! ordering and cancellation rules but is driven entirely by explicit calls
//! against an external clock.

pub mod passive;
pub mod scheduler;

pub use passive::PassiveEventScheduler;
pub use scheduler::{DiscreteEventScheduler, DiscreteSchedulerConfig, TimeInPastPolicy};
