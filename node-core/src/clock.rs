//! Wrapping millisecond clock shared by every timing component.
//!
//! The platform counter is a 32-bit millisecond tick that overflows roughly
//! every 49.7 days. Instants are therefore never compared with `<`; every
//! check is expressed as "has at least this much time elapsed since that
//! reference", computed with wrapping subtraction so it stays correct across
//! the overflow.

use core::cell::Cell;
use core::fmt;
use core::ops::Add;
use core::time::Duration;

/// Millisecond span used by sequences, timers, and debounce windows.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Milliseconds(u32);

impl Milliseconds {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Converts into a [`Duration`] for host-side tooling.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.0 as u64)
    }
}

impl From<Milliseconds> for Duration {
    fn from(value: Milliseconds) -> Self {
        value.as_duration()
    }
}

impl fmt::Display for Milliseconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Point on the wrapping millisecond timeline.
///
/// Deliberately not `Ord`: ordering two raw counter values is meaningless once
/// the counter has wrapped.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Instant(u32);

impl Instant {
    pub const BOOT: Self = Self(0);

    #[must_use]
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Time elapsed since `earlier`, assuming less than one full counter period
    /// separates the two samples.
    #[must_use]
    pub const fn elapsed_since(self, earlier: Instant) -> Milliseconds {
        Milliseconds(self.0.wrapping_sub(earlier.0))
    }

    /// Returns `true` once at least `span` has elapsed since `since`.
    #[must_use]
    pub const fn has_elapsed(self, since: Instant, span: Milliseconds) -> bool {
        self.0.wrapping_sub(since.0) >= span.0
    }
}

impl Add<Milliseconds> for Instant {
    type Output = Instant;

    fn add(self, rhs: Milliseconds) -> Self::Output {
        Instant(self.0.wrapping_add(rhs.0))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}ms", self.0)
    }
}

/// Source of the current [`Instant`].
pub trait MonotonicClock {
    fn now(&self) -> Instant;
}

/// Clock advanced by hand, used by the emulator and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u32>,
}

impl ManualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    #[must_use]
    pub const fn starting_at(millis: u32) -> Self {
        Self {
            now: Cell::new(millis),
        }
    }

    /// Moves the clock forward, wrapping at the counter modulus.
    pub fn advance(&self, span: Milliseconds) -> Instant {
        let next = self.now.get().wrapping_add(span.as_u32());
        self.now.set(next);
        Instant(next)
    }

    pub fn set(&self, instant: Instant) {
        self.now.set(instant.0);
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Instant {
        Instant(self.now.get())
    }
}
