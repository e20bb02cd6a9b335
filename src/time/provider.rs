//! Virtual and wall-clock time providers

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{SchedulerError, SchedulerResult};
use crate::time::TimeUnit;

/// Source of the scalar time a scheduler observes.
pub trait TimeProvider: Send + Sync {
    /// Current time in ticks
    fn now(&self) -> f64;

    /// The physical meaning of one tick, when configured
    fn unit(&self) -> Option<TimeUnit> {
        None
    }
}

/// Adjustable clock advanced under program control.
///
/// The discrete scheduler advances it as events run; tests and simulations
/// may also move it explicitly. It never moves backwards.
pub struct VirtualTimeProvider {
    now: Mutex<f64>,
    unit: Option<TimeUnit>,
}

impl VirtualTimeProvider {
    /// Create a virtual clock starting at `start`
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
            unit: None,
        }
    }

    /// Create a unit-aware virtual clock starting at `start`
    pub fn with_unit(start: f64, unit: TimeUnit) -> Self {
        Self {
            now: Mutex::new(start),
            unit: Some(unit),
        }
    }

    /// Advance the clock by a non-negative delta
    pub fn advance(&self, delta: f64) -> SchedulerResult<()> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(SchedulerError::IllegalArgument(format!(
                "cannot advance time by {delta}"
            )));
        }
        *self.now.lock() += delta;
        Ok(())
    }

    /// Set the clock to an absolute time at or after the current one
    pub fn set_time(&self, time: f64) -> SchedulerResult<()> {
        let mut now = self.now.lock();
        if !time.is_finite() || time < *now {
            return Err(SchedulerError::IllegalArgument(format!(
                "cannot set time to {time} behind current {}",
                *now
            )));
        }
        *now = time;
        Ok(())
    }

    /// Move the clock to `max(now, time)`. The loop uses this so the clock
    /// never runs backwards even when a popped event's time has rounded
    /// below it.
    pub(crate) fn advance_to(&self, time: f64) -> f64 {
        let mut now = self.now.lock();
        if time > *now {
            *now = time;
        }
        *now
    }
}

impl TimeProvider for VirtualTimeProvider {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn unit(&self) -> Option<TimeUnit> {
        self.unit
    }
}

/// Wall clock reporting ticks since the Unix epoch.
///
/// The no-unit configuration keeps millisecond ticks internally but reports
/// no unit, which gates every instant/duration API behind
/// [`SchedulerError::TimeUnitNotSpecified`].
pub struct WallClockTimeProvider {
    unit: Option<TimeUnit>,
}

impl WallClockTimeProvider {
    /// Create a unit-aware wall clock
    pub fn new(unit: TimeUnit) -> Self {
        Self { unit: Some(unit) }
    }

    /// Create a wall clock with an unspecified unit
    pub fn without_unit() -> Self {
        Self { unit: None }
    }

    /// Tick unit used for internal conversions
    pub(crate) fn internal_unit(&self) -> TimeUnit {
        self.unit.unwrap_or(TimeUnit::Millis)
    }

    /// Wall-clock duration of a tick delta (non-positive deltas are zero)
    pub(crate) fn wall_delay(&self, delta_ticks: f64) -> std::time::Duration {
        self.internal_unit().duration_of(delta_ticks)
    }
}

impl TimeProvider for WallClockTimeProvider {
    fn now(&self) -> f64 {
        self.internal_unit().ticks_at(Utc::now())
    }

    fn unit(&self) -> Option<TimeUnit> {
        self.unit
    }
}
