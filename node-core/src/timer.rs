//! Single-deadline timers polled from the main loop.

use crate::clock::{Instant, Milliseconds};

/// Deadline timer that can optionally re-arm itself each time it fires.
///
/// Arming stores the reference instant plus the span instead of an absolute
/// deadline so expiry checks stay wrap-safe.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OneShotTimer {
    armed_at: Option<Instant>,
    span: Milliseconds,
    periodic: bool,
}

impl OneShotTimer {
    /// Creates a disarmed one-shot timer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            armed_at: None,
            span: Milliseconds::ZERO,
            periodic: false,
        }
    }

    /// Creates a disarmed timer that re-arms from the firing tick on every [`poll`](Self::poll).
    #[must_use]
    pub const fn periodic() -> Self {
        Self {
            armed_at: None,
            span: Milliseconds::ZERO,
            periodic: true,
        }
    }

    pub fn start(&mut self, now: Instant, span: Milliseconds) {
        self.armed_at = Some(now);
        self.span = span;
    }

    /// Re-arms with the previous span, measured from `now`.
    pub fn repeat(&mut self, now: Instant) {
        self.armed_at = Some(now);
    }

    pub fn stop(&mut self) {
        self.armed_at = None;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    #[must_use]
    pub const fn is_periodic(&self) -> bool {
        self.periodic
    }

    #[must_use]
    pub const fn span(&self) -> Milliseconds {
        self.span
    }

    /// Pure read; a disarmed timer is never expired.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.armed_at
            .is_some_and(|armed_at| now.has_elapsed(armed_at, self.span))
    }

    /// Absolute deadline, for diagnostics only.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.armed_at.map(|armed_at| armed_at + self.span)
    }

    /// Time left before expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Milliseconds> {
        self.armed_at.map(|armed_at| {
            let elapsed = now.elapsed_since(armed_at).as_u32();
            Milliseconds::new(self.span.as_u32().saturating_sub(elapsed))
        })
    }

    /// Returns `true` exactly once per expiry. Periodic timers re-arm from
    /// `now`; one-shot timers disarm.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_expired(now) {
            return false;
        }

        if self.periodic {
            self.repeat(now);
        } else {
            self.stop();
        }
        true
    }
}

impl Default for OneShotTimer {
    fn default() -> Self {
        Self::new()
    }
}
