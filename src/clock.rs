// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wall-clock abstraction.
//!
//! Backoff windows, session expiry and request stamps all read time through
//! [`WallClock`] so tests can drive them with a [`ManualClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Local, TimeZone, Timelike};

/// Source of wall-clock milliseconds since the Unix epoch.
pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn now_secs(&self) -> i64 {
        self.now_ms() / 1000
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(start_ms),
        })
    }

    pub fn set(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1000);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Hands out strictly increasing millisecond stamps.
///
/// Two calls landing in the same millisecond get `last + 1`, so every event
/// and request stamped by one tracker has a distinct timestamp.
#[derive(Debug, Default)]
pub struct MonotonicStamp {
    last: AtomicI64,
}

impl MonotonicStamp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now_ms: i64) -> i64 {
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if now_ms > last { now_ms } else { last + 1 };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Local hour (0-23) and day of week (0 = Sunday) for a millisecond timestamp.
#[must_use]
pub fn hour_and_dow(ms: i64) -> (u32, u32) {
    match Local.timestamp_millis_opt(ms).single() {
        Some(dt) => (dt.hour(), dt.weekday().num_days_from_sunday()),
        None => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_secs(2);
        assert_eq!(clock.now_ms(), 3_000);
        assert_eq!(clock.now_secs(), 3);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_stamps_are_strictly_increasing() {
        let stamps = MonotonicStamp::new();
        assert_eq!(stamps.next(100), 100);
        assert_eq!(stamps.next(100), 101);
        assert_eq!(stamps.next(50), 102);
        assert_eq!(stamps.next(500), 500);
    }

    #[test]
    fn test_hour_and_dow_in_range() {
        let (hour, dow) = hour_and_dow(SystemClock.now_ms());
        assert!(hour < 24);
        assert!(dow < 7);
    }
}
