//! Device uptime that keeps counting after the millisecond counter wraps.
//!
//! The counter overflows after 2^32 ms. A wrap is detected when a sample lands
//! near zero after an earlier sample was seen in the top of the range; both
//! windows are wide enough that a 1 Hz caller cannot miss them.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::clock::{Instant, Milliseconds};

/// Minimum spacing between two recomputations.
pub const UPTIME_SAMPLE_INTERVAL: Milliseconds = Milliseconds::new(1_000);
/// Samples at or above this raw value arm wrap detection.
pub const WRAP_HIGH_WATER_MS: u32 = 3_000_000_000;
/// Samples at or below this raw value, once armed, count as a wrap.
pub const WRAP_LOW_WINDOW_MS: u32 = 100_000;

/// Milliseconds in one counter period.
const COUNTER_PERIOD_MS: u64 = 1 << 32;

/// Capacity for the rendered `D:HH:MM:SS` string.
pub const UPTIME_TEXT_CAPACITY: usize = 24;

/// Broken-down uptime.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UptimeSnapshot {
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl UptimeSnapshot {
    #[must_use]
    pub fn from_total_millis(total_ms: u64) -> Self {
        let total_secs = total_ms / 1_000;
        // Each component is bounded by its modulus before narrowing.
        let seconds = u8::try_from(total_secs % 60).unwrap_or(0);
        let minutes = u8::try_from((total_secs / 60) % 60).unwrap_or(0);
        let hours = u8::try_from((total_secs / 3_600) % 24).unwrap_or(0);
        let days = u32::try_from(total_secs / 86_400).unwrap_or(u32::MAX);
        Self {
            days,
            hours,
            minutes,
            seconds,
        }
    }

    /// Renders `D:HH:MM:SS`.
    #[must_use]
    pub fn format(&self) -> String<UPTIME_TEXT_CAPACITY> {
        let mut text = String::new();
        // Capacity covers the widest possible value.
        let _ = write!(text, "{self}");
        text
    }
}

impl fmt::Display for UptimeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02}:{:02}",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// Uptime accumulator fed from the main loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RolloverSafeUptime {
    wrap_count: u32,
    wrap_pending: bool,
    last_sample: Instant,
    total_ms: u64,
}

impl RolloverSafeUptime {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        let mut uptime = Self {
            wrap_count: 0,
            wrap_pending: false,
            last_sample: now,
            total_ms: 0,
        };
        uptime.sample(now);
        uptime
    }

    /// Recomputes uptime when at least one sample interval has passed.
    /// Returns `true` when a new sample was taken.
    pub fn update(&mut self, now: Instant) -> bool {
        if !now.has_elapsed(self.last_sample, UPTIME_SAMPLE_INTERVAL) {
            return false;
        }
        self.last_sample = now;
        self.sample(now);
        true
    }

    fn sample(&mut self, now: Instant) {
        let raw = now.as_millis();
        if raw >= WRAP_HIGH_WATER_MS {
            self.wrap_pending = true;
        } else if self.wrap_pending && raw <= WRAP_LOW_WINDOW_MS {
            self.wrap_count = self.wrap_count.wrapping_add(1);
            self.wrap_pending = false;
        }
        self.total_ms = u64::from(self.wrap_count) * COUNTER_PERIOD_MS + u64::from(raw);
    }

    #[must_use]
    pub const fn wrap_count(&self) -> u32 {
        self.wrap_count
    }

    #[must_use]
    pub const fn total_millis(&self) -> u64 {
        self.total_ms
    }

    #[must_use]
    pub fn snapshot(&self) -> UptimeSnapshot {
        UptimeSnapshot::from_total_millis(self.total_ms)
    }

    #[must_use]
    pub fn format(&self) -> String<UPTIME_TEXT_CAPACITY> {
        self.snapshot().format()
    }
}

impl fmt::Display for RolloverSafeUptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u32) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn updates_are_rate_limited() {
        let mut uptime = RolloverSafeUptime::new(at(0));
        assert!(!uptime.update(at(999)));
        assert_eq!(uptime.total_millis(), 0);
        assert!(uptime.update(at(1_000)));
        assert_eq!(uptime.total_millis(), 1_000);
    }

    #[test]
    fn formats_days_hours_minutes_seconds() {
        let mut uptime = RolloverSafeUptime::new(at(0));
        let one_day_plus = 86_400_000 + 3_600_000 * 2 + 60_000 * 3 + 4_000;
        uptime.update(at(one_day_plus));
        assert_eq!(uptime.format().as_str(), "1:02:03:04");
    }

    #[test]
    fn low_sample_without_high_water_is_not_a_wrap() {
        let mut uptime = RolloverSafeUptime::new(at(50_000));
        uptime.update(at(90_000));
        assert_eq!(uptime.wrap_count(), 0);
    }

    #[test]
    fn sample_after_the_low_window_misses_the_wrap() {
        let mut uptime = RolloverSafeUptime::new(at(WRAP_HIGH_WATER_MS));
        uptime.update(at(WRAP_LOW_WINDOW_MS + 1));
        assert_eq!(uptime.wrap_count(), 0);
    }

    #[test]
    fn counts_wrap_once() {
        let mut uptime = RolloverSafeUptime::new(at(u32::MAX - 5_000));
        uptime.update(at(20_000));
        uptime.update(at(40_000));
        assert_eq!(uptime.wrap_count(), 1);
        assert_eq!(uptime.total_millis(), COUNTER_PERIOD_MS + 40_000);
        assert_eq!(uptime.snapshot().days, 49);
    }
}
