//! Time model
//!
//! Scheduler time is a scalar `f64`, optionally backed by a physical
//! [`TimeUnit`]. Providers are either *virtual* (adjustable, advanced by the
//! scheduler loop) or *wall* (ticks since the Unix epoch). A scheduler whose
//! provider carries no unit refuses every instant/duration API with
//! [`crate::SchedulerError::TimeUnitNotSpecified`].

pub mod convert;
pub mod provider;
pub mod unit;

pub use convert::TimeConverter;
pub use provider::{TimeProvider, VirtualTimeProvider, WallClockTimeProvider};
pub use unit::TimeUnit;
