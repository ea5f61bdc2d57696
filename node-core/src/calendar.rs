//! Calendar time for reports once a network time source has answered.
//!
//! The monotonic [`Instant`] keeps driving every timer. Wall-clock time is
//! only derived for display: an anchor pairs one instant with the UTC second
//! it corresponds to, and later instants are projected forward from it. Until
//! the first anchor exists, reports fall back to device uptime.

use core::fmt;

use crate::clock::Instant;
use crate::uptime::UptimeSnapshot;

const SECS_PER_DAY: u64 = 86_400;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Source of UTC time.
pub trait WallClock {
    /// Seconds since the Unix epoch at `now`, or `None` before the first sync.
    fn unix_seconds(&self, now: Instant) -> Option<u64>;
}

/// One instant on the monotonic timeline and the UTC second it matched.
///
/// Projection relies on [`Instant::elapsed_since`], so an anchor must be
/// refreshed well within one counter period.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimeAnchor {
    pub at: Instant,
    pub unix_seconds: u64,
}

impl TimeAnchor {
    #[must_use]
    pub const fn new(at: Instant, unix_seconds: u64) -> Self {
        Self { at, unix_seconds }
    }

    /// UTC seconds at `now`.
    #[must_use]
    pub fn project(&self, now: Instant) -> u64 {
        let elapsed_secs = now.elapsed_since(self.at).as_u32() / 1_000;
        self.unix_seconds + u64::from(elapsed_secs)
    }
}

/// Wall clock held in memory, used by the emulator and tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AnchoredClock {
    anchor: Option<TimeAnchor>,
}

impl AnchoredClock {
    #[must_use]
    pub const fn unsynced() -> Self {
        Self { anchor: None }
    }

    #[must_use]
    pub const fn synced(anchor: TimeAnchor) -> Self {
        Self {
            anchor: Some(anchor),
        }
    }

    pub fn sync(&mut self, anchor: TimeAnchor) {
        self.anchor = Some(anchor);
    }
}

impl WallClock for AnchoredClock {
    fn unix_seconds(&self, now: Instant) -> Option<u64> {
        self.anchor.map(|anchor| anchor.project(now))
    }
}

/// Broken-down civil time, rendered as `dd-Mmm-yyyy hh:mm:ss`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DateTime {
    pub year: u32,
    /// 1-based.
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Splits seconds since the Unix epoch into calendar fields. Any offset
    /// from UTC must already be applied.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_unix_seconds(seconds: u64) -> Self {
        let days = seconds / SECS_PER_DAY;
        let of_day = seconds % SECS_PER_DAY;
        let (year, month, day) = civil_from_days(days);
        Self {
            year,
            month,
            day,
            hour: (of_day / 3_600) as u8,
            minute: ((of_day / 60) % 60) as u8,
            second: (of_day % 60) as u8,
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let month = MONTHS
            .get(usize::from(self.month.saturating_sub(1)))
            .copied()
            .unwrap_or("???");
        write!(
            f,
            "{:02}-{month}-{:04} {:02}:{:02}:{:02}",
            self.day, self.year, self.hour, self.minute, self.second
        )
    }
}

/// Proleptic Gregorian date for a day count since 1970-01-01 (Hinnant's
/// `civil_from_days`, restricted to non-negative inputs).
#[allow(clippy::cast_possible_truncation)]
fn civil_from_days(days: u64) -> (u32, u8, u8) {
    let shifted = days + 719_468;
    let era = shifted / 146_097;
    let day_of_era = shifted - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let march_month = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * march_month + 2) / 5 + 1;
    let month = if march_month < 10 {
        march_month + 3
    } else {
        march_month - 9
    };
    let year = year_of_era + era * 400 + u64::from(month <= 2);
    (year as u32, month as u8, day as u8)
}

/// Time label for reports: local calendar time when synced, uptime otherwise.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Timestamp {
    Wall(DateTime),
    Uptime(UptimeSnapshot),
}

impl Timestamp {
    /// Reads `clock` at `now`, shifts by `utc_offset_secs`, and falls back to
    /// `uptime` before the first sync.
    #[must_use]
    pub fn resolve<C: WallClock + ?Sized>(
        clock: &C,
        now: Instant,
        utc_offset_secs: i32,
        uptime: UptimeSnapshot,
    ) -> Self {
        clock
            .unix_seconds(now)
            .and_then(|utc| utc.checked_add_signed(i64::from(utc_offset_secs)))
            .map_or(Timestamp::Uptime(uptime), |local| {
                Timestamp::Wall(DateTime::from_unix_seconds(local))
            })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Wall(date_time) => fmt::Display::fmt(date_time, f),
            Timestamp::Uptime(uptime) => fmt::Display::fmt(uptime, f),
        }
    }
}
