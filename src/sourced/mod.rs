//! Source-tracking multiplexer
//!
//! A family of logical schedulers multiplexed onto one backing discrete
//! scheduler. Each wrapper tags its events with a source; the shared
//! [`SourceTracker`] register tells any event body which logical scheduler
//! it is running on. Wrappers support per-source virtual pause
//! (`delay_execution_until`) and a two-phase per-wrapper shutdown that
//! leaves the backing scheduler running for the other sources.

pub mod tracker;
pub mod wrapper;

pub use tracker::SourceTracker;
pub use wrapper::{SourcedScheduler, SourcedSchedulerFamily};
