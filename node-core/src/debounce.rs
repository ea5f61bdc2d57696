//! Debounced push-button input.

use core::fmt;

use crate::clock::{Instant, Milliseconds};
use crate::pattern::Level;

/// Minimum time a new level must hold before it is accepted.
pub const DEBOUNCE_WINDOW: Milliseconds = Milliseconds::new(40);
/// Press length at which a release counts as a long press.
pub const LONG_PRESS_THRESHOLD: Milliseconds = Milliseconds::from_secs(8);

/// Identifier for the physical buttons.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InputId {
    Button1,
    Button2,
}

impl InputId {
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            InputId::Button1 => 0,
            InputId::Button2 => 1,
        }
    }

    #[must_use]
    pub const fn mcu_pin(self) -> &'static str {
        match self {
            InputId::Button1 => "GPIO9",
            InputId::Button2 => "GPIO10",
        }
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputId::Button1 => f.write_str("button1"),
            InputId::Button2 => f.write_str("button2"),
        }
    }
}

/// Raw pin access for the buttons.
pub trait InputReader {
    fn level(&mut self, input: InputId) -> Level;
}

/// Debounced transition reported by [`DebouncedInput::poll`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ButtonEvent {
    Pressed,
    Released { held_for: Milliseconds },
}

/// Caller-side interpretation of a release.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PressKind {
    Short,
    Long,
}

impl PressKind {
    #[must_use]
    pub fn classify(held_for: Milliseconds, threshold: Milliseconds) -> Self {
        if held_for >= threshold {
            PressKind::Long
        } else {
            PressKind::Short
        }
    }
}

/// Debounce state machine for one input line.
///
/// A raw level that differs from the current candidate restarts tracking; a
/// candidate that survives the full window and differs from the stable level
/// is committed and reported exactly once.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DebouncedInput {
    active: Level,
    window: Milliseconds,
    stable: Level,
    candidate: Level,
    candidate_since: Instant,
    pressed_at: Option<Instant>,
}

impl DebouncedInput {
    /// Creates an input that idles at `idle` and reports a press on `active`.
    #[must_use]
    pub const fn new(now: Instant, idle: Level, active: Level, window: Milliseconds) -> Self {
        Self {
            active,
            window,
            stable: idle,
            candidate: idle,
            candidate_since: now,
            pressed_at: None,
        }
    }

    /// Pull-up wiring: idle high, pressed low.
    #[must_use]
    pub const fn pull_up(now: Instant) -> Self {
        Self::new(now, Level::High, Level::Low, DEBOUNCE_WINDOW)
    }

    pub fn poll(&mut self, now: Instant, raw: Level) -> Option<ButtonEvent> {
        if raw != self.candidate {
            self.candidate = raw;
            self.candidate_since = now;
            return None;
        }

        if self.candidate == self.stable || !now.has_elapsed(self.candidate_since, self.window) {
            return None;
        }

        self.stable = self.candidate;
        if self.stable == self.active {
            self.pressed_at = Some(now);
            Some(ButtonEvent::Pressed)
        } else {
            let held_for = self
                .pressed_at
                .take()
                .map_or(Milliseconds::ZERO, |pressed_at| now.elapsed_since(pressed_at));
            Some(ButtonEvent::Released { held_for })
        }
    }

    #[must_use]
    pub fn is_pressed(&self) -> bool {
        self.stable == self.active
    }

    /// How long the button has been held, if it is currently down.
    #[must_use]
    pub fn held_for(&self, now: Instant) -> Option<Milliseconds> {
        self.pressed_at
            .map(|pressed_at| now.elapsed_since(pressed_at))
    }
}
