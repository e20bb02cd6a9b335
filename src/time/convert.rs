//! Canonicalising conversion cache
//!
//! Converting the same tick value to an instant over and over is common on
//! logging and reporting paths; the converter interns results so repeated
//! conversion of equal inputs returns values that compare equal without
//! re-deriving them each time.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use crate::time::TimeUnit;

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Unit-aware tick/instant converter with an interning cache.
pub struct TimeConverter {
    unit: TimeUnit,
    cache: Mutex<LruCache<u64, DateTime<Utc>>>,
}

impl TimeConverter {
    /// Create a converter with the default cache capacity
    pub fn new(unit: TimeUnit) -> Self {
        Self::with_capacity(unit, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a converter with an explicit cache capacity
    pub fn with_capacity(unit: TimeUnit, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            unit,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The unit this converter translates through
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Instant for a tick count since the Unix epoch
    pub fn instant_of(&self, ticks: f64) -> DateTime<Utc> {
        let key = ticks.to_bits();
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get(&key) {
            return *cached;
        }
        let converted = self.unit.instant_at(ticks);
        cache.put(key, converted);
        converted
    }

    /// Tick count for an absolute instant
    pub fn ticks_of(&self, at: DateTime<Utc>) -> f64 {
        self.unit.ticks_at(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_inputs_convert_equal() {
        let converter = TimeConverter::new(TimeUnit::Millis);
        let a = converter.instant_of(1_717_245_000_000.0);
        let b = converter.instant_of(1_717_245_000_000.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_round_trip_through_converter() {
        let converter = TimeConverter::new(TimeUnit::Seconds);
        let at = converter.instant_of(1_717_245_000.0);
        assert_eq!(converter.ticks_of(at), 1_717_245_000.0);
    }

    #[test]
    fn test_tiny_capacity_still_converts() {
        let converter = TimeConverter::with_capacity(TimeUnit::Millis, 1);
        let a = converter.instant_of(1.0);
        let _b = converter.instant_of(2.0);
        let a_again = converter.instant_of(1.0);
        assert_eq!(a, a_again);
    }
}
