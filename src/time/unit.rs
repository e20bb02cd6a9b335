//! Physical meaning of one scheduler tick

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The wall-clock duration of one tick of scheduler time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// One tick is a nanosecond
    Nanos,
    /// One tick is a microsecond
    Micros,
    /// One tick is a millisecond
    Millis,
    /// One tick is a second
    Seconds,
}

impl TimeUnit {
    /// Nanoseconds per tick
    pub fn nanos_per_tick(&self) -> f64 {
        match self {
            TimeUnit::Nanos => 1.0,
            TimeUnit::Micros => 1_000.0,
            TimeUnit::Millis => 1_000_000.0,
            TimeUnit::Seconds => 1_000_000_000.0,
        }
    }

    /// Ticks per second in this unit
    fn ticks_per_sec(&self) -> f64 {
        1_000_000_000.0 / self.nanos_per_tick()
    }

    /// Ticks since the Unix epoch for an absolute instant.
    ///
    /// Whole seconds and the sub-second remainder convert separately so the
    /// arithmetic stays inside f64's exact-integer range.
    pub fn ticks_at(&self, at: DateTime<Utc>) -> f64 {
        at.timestamp() as f64 * self.ticks_per_sec()
            + f64::from(at.timestamp_subsec_nanos()) / self.nanos_per_tick()
    }

    /// Absolute instant for a tick count since the Unix epoch. Values outside
    /// chrono's representable range clamp to the range boundary.
    pub fn instant_at(&self, ticks: f64) -> DateTime<Utc> {
        if !ticks.is_finite() {
            return if ticks > 0.0 {
                DateTime::<Utc>::MAX_UTC
            } else {
                DateTime::<Utc>::MIN_UTC
            };
        }
        let secs = (ticks / self.ticks_per_sec()).floor();
        let rem_ticks = (ticks - secs * self.ticks_per_sec()).max(0.0);
        let subsec = (rem_ticks * self.nanos_per_tick()) as u32;
        match Utc.timestamp_opt(secs as i64, subsec.min(999_999_999)) {
            chrono::LocalResult::Single(dt) => dt,
            _ if secs > 0.0 => DateTime::<Utc>::MAX_UTC,
            _ => DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Tick count covering a wall-clock duration
    pub fn ticks_in(&self, duration: std::time::Duration) -> f64 {
        duration.as_nanos() as f64 / self.nanos_per_tick()
    }

    /// Wall-clock duration of a tick delta. Negative or non-finite deltas
    /// clamp to zero.
    pub fn duration_of(&self, ticks: f64) -> std::time::Duration {
        if !ticks.is_finite() || ticks <= 0.0 {
            return std::time::Duration::ZERO;
        }
        let secs = ticks * self.nanos_per_tick() / 1_000_000_000.0;
        std::time::Duration::try_from_secs_f64(secs).unwrap_or(std::time::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ticks_in_round_trips_duration() {
        assert_eq!(TimeUnit::Millis.ticks_in(Duration::from_millis(250)), 250.0);
        assert_eq!(TimeUnit::Seconds.ticks_in(Duration::from_secs(3)), 3.0);
        assert_eq!(TimeUnit::Micros.ticks_in(Duration::from_millis(1)), 1_000.0);
    }

    #[test]
    fn test_duration_of_clamps_negative_to_zero() {
        assert_eq!(TimeUnit::Millis.duration_of(-5.0), Duration::ZERO);
        assert_eq!(TimeUnit::Millis.duration_of(f64::NAN), Duration::ZERO);
        assert_eq!(TimeUnit::Millis.duration_of(5.0), Duration::from_millis(5));
    }

    #[test]
    fn test_instant_round_trip() {
        let unit = TimeUnit::Millis;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let ticks = unit.ticks_at(at);
        assert_eq!(unit.instant_at(ticks), at);
    }

    #[test]
    fn test_instant_at_clamps_out_of_range() {
        assert_eq!(
            TimeUnit::Seconds.instant_at(f64::INFINITY),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
