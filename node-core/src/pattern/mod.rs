//! Timed on/off patterns played on a single output line.
//!
//! A pattern is a list of interval lengths. The output starts low and flips
//! each time the current interval elapses, so `[100, 80]` means "stay low for
//! 100 ms, go high for 80 ms, then return low". Players never block; the main
//! loop calls [`PatternPlayer::advance`] every tick and the player writes to
//! the output only when an interval boundary is crossed.

use core::fmt;

use crate::clock::{Instant, Milliseconds};

pub mod catalog;

pub use catalog::{
    BEEP_TEMPLATE, BROKER_JOIN_TEMPLATE, CONFIRM_TEMPLATE, NETWORK_JOIN_TEMPLATE, PING_TEMPLATE,
    READY_TEMPLATE,
};

/// Logical level of an output. Hardware polarity is applied by the driver.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }

    #[must_use]
    pub const fn from_bool(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("low"),
            Level::High => f.write_str("high"),
        }
    }
}

/// Identifier for the logical output lines exposed by the node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputId {
    StatusLed,
    Beeper,
    Port1,
    Port2,
}

impl OutputId {
    /// Deterministic index for lookups into [`ALL_OUTPUTS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            OutputId::StatusLed => 0,
            OutputId::Beeper => 1,
            OutputId::Port1 => 2,
            OutputId::Port2 => 3,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(OutputId::StatusLed),
            1 => Some(OutputId::Beeper),
            2 => Some(OutputId::Port1),
            3 => Some(OutputId::Port2),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        output_by_id(self).name
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Electrical polarity of an output line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    /// Pin state that represents the given logical level.
    #[must_use]
    pub const fn drives_high(self, level: Level) -> bool {
        match self {
            Polarity::ActiveHigh => level.is_high(),
            Polarity::ActiveLow => !level.is_high(),
        }
    }
}

/// Metadata describing how an output line is routed on the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputLine {
    pub id: OutputId,
    pub name: &'static str,
    pub mcu_pin: &'static str,
    pub polarity: Polarity,
}

impl OutputLine {
    #[must_use]
    pub const fn new(
        id: OutputId,
        name: &'static str,
        mcu_pin: &'static str,
        polarity: Polarity,
    ) -> Self {
        Self {
            id,
            name,
            mcu_pin,
            polarity,
        }
    }
}

/// Compile-time catalog of every output line.
pub const ALL_OUTPUTS: [OutputLine; 4] = [
    OutputLine::new(OutputId::StatusLed, "LED", "GPIO8", Polarity::ActiveHigh),
    OutputLine::new(OutputId::Beeper, "BEEPER", "GPIO7", Polarity::ActiveLow),
    OutputLine::new(OutputId::Port1, "PORT1", "GPIO4", Polarity::ActiveLow),
    OutputLine::new(OutputId::Port2, "PORT2", "GPIO5", Polarity::ActiveHigh),
];

/// Returns the routing metadata for `id`.
#[must_use]
pub const fn output_by_id(id: OutputId) -> OutputLine {
    ALL_OUTPUTS[id.as_index()]
}

/// Hardware abstraction the players and command handlers write through.
pub trait OutputDriver {
    fn write(&mut self, output: OutputId, level: Level);
}

/// Driver that discards every write, handy for tests that only track state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOutputDriver;

impl OutputDriver for NoopOutputDriver {
    fn write(&mut self, _output: OutputId, _level: Level) {}
}

/// Identifies the built-in patterns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PatternKind {
    Ping,
    Beep,
    Ready,
    NetworkJoin,
    BrokerJoin,
    Confirm,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PatternKind::Ping => "ping",
            PatternKind::Beep => "beep",
            PatternKind::Ready => "ready",
            PatternKind::NetworkJoin => "network-join",
            PatternKind::BrokerJoin => "broker-join",
            PatternKind::Confirm => "confirm",
        };
        f.write_str(label)
    }
}

/// Interval list plus the output and repeat policy it plays with.
///
/// A zero interval terminates the list early; otherwise the slice length does.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PatternTemplate {
    pub kind: PatternKind,
    pub output: OutputId,
    pub steps: &'static [Milliseconds],
    pub repeat_forever: bool,
}

impl PatternTemplate {
    #[must_use]
    pub const fn new(
        kind: PatternKind,
        output: OutputId,
        steps: &'static [Milliseconds],
        repeat_forever: bool,
    ) -> Self {
        Self {
            kind,
            output,
            steps,
            repeat_forever,
        }
    }

    /// Number of intervals before the terminator.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps
            .iter()
            .position(|step| step.is_zero())
            .unwrap_or(self.steps.len())
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<Milliseconds> {
        if index < self.step_count() {
            self.steps.get(index).copied()
        } else {
            None
        }
    }

    /// Length of one full traversal.
    #[must_use]
    pub fn cycle_length(&self) -> Milliseconds {
        let total = self
            .steps
            .iter()
            .take(self.step_count())
            .fold(0u32, |acc, step| acc.saturating_add(step.as_u32()));
        Milliseconds::new(total)
    }
}

/// Plays a [`PatternTemplate`] on its output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PatternPlayer {
    template: PatternTemplate,
    index: usize,
    level: Level,
    armed: bool,
    step_started_at: Instant,
}

impl PatternPlayer {
    #[must_use]
    pub const fn new(template: PatternTemplate) -> Self {
        Self {
            template,
            index: 0,
            level: Level::Low,
            armed: false,
            step_started_at: Instant::BOOT,
        }
    }

    #[must_use]
    pub const fn template(&self) -> &PatternTemplate {
        &self.template
    }

    #[must_use]
    pub const fn output(&self) -> OutputId {
        self.template.output
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Arms the player from the first interval and drives the output low.
    ///
    /// Restarting an armed player rewinds it.
    pub fn start<D: OutputDriver>(&mut self, now: Instant, driver: &mut D) {
        self.index = 0;
        self.level = Level::Low;
        self.step_started_at = now;
        self.armed = self.template.step_count() > 0;
        driver.write(self.template.output, Level::Low);
    }

    /// Disarms without touching the output or rewinding the index.
    pub fn stop(&mut self) {
        self.armed = false;
    }

    /// Disarms and returns the output to its idle level.
    pub fn halt<D: OutputDriver>(&mut self, driver: &mut D) {
        self.armed = false;
        self.index = 0;
        self.level = Level::Low;
        driver.write(self.template.output, Level::Low);
    }

    /// Crosses at most one interval boundary. Returns `true` when the output flipped.
    pub fn advance<D: OutputDriver>(&mut self, now: Instant, driver: &mut D) -> bool {
        if !self.armed {
            return false;
        }

        let Some(current) = self.template.step(self.index) else {
            self.finish_cycle();
            return false;
        };

        if !now.has_elapsed(self.step_started_at, current) {
            return false;
        }

        self.index += 1;
        self.level = self.level.toggled();
        self.step_started_at = now;
        driver.write(self.template.output, self.level);

        if self.template.step(self.index).is_none() {
            self.finish_cycle();
        }
        true
    }

    fn finish_cycle(&mut self) {
        self.index = 0;
        if !self.template.repeat_forever {
            self.armed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Default)]
    struct RecordingDriver {
        writes: Vec<(OutputId, Level), 32>,
    }

    impl OutputDriver for RecordingDriver {
        fn write(&mut self, output: OutputId, level: Level) {
            self.writes.push((output, level)).expect("write log full");
        }
    }

    const TWO_STEPS: [Milliseconds; 2] = [Milliseconds::new(40), Milliseconds::new(60)];
    const TERMINATED: [Milliseconds; 4] = [
        Milliseconds::new(10),
        Milliseconds::new(10),
        Milliseconds::ZERO,
        Milliseconds::new(999),
    ];

    fn at(ms: u32) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn output_catalog_is_indexed_by_id() {
        for (index, line) in ALL_OUTPUTS.iter().enumerate() {
            assert_eq!(line.id.as_index(), index);
            assert_eq!(OutputId::from_index(index), Some(line.id));
        }
        assert_eq!(OutputId::from_index(ALL_OUTPUTS.len()), None);
        assert!(!Polarity::ActiveLow.drives_high(Level::High));
    }

    #[test]
    fn zero_interval_terminates_template() {
        let template =
            PatternTemplate::new(PatternKind::Beep, OutputId::Beeper, &TERMINATED, false);
        assert_eq!(template.step_count(), 2);
        assert_eq!(template.cycle_length(), Milliseconds::new(20));
    }

    #[test]
    fn steps_past_the_terminator_are_absent() {
        let template =
            PatternTemplate::new(PatternKind::Beep, OutputId::Beeper, &TERMINATED, false);
        assert_eq!(template.step(1), Some(Milliseconds::new(10)));
        assert_eq!(template.step(2), None);
        assert_eq!(template.step(3), None, "values after the terminator are ignored");
        assert_eq!(template.step(usize::MAX), None);
    }

    #[test]
    fn stop_preserves_position() {
        let template =
            PatternTemplate::new(PatternKind::Beep, OutputId::Beeper, &TWO_STEPS, true);
        let mut player = PatternPlayer::new(template);
        let mut driver = RecordingDriver::default();

        player.start(at(0), &mut driver);
        assert!(player.advance(at(40), &mut driver));
        player.stop();

        assert!(!player.advance(at(500), &mut driver));
        assert_eq!(player.index(), 1);
        assert_eq!(player.level(), Level::High);
    }

    #[test]
    fn repeating_player_wraps_index() {
        let template =
            PatternTemplate::new(PatternKind::Ready, OutputId::StatusLed, &TWO_STEPS, true);
        let mut player = PatternPlayer::new(template);
        let mut driver = RecordingDriver::default();

        player.start(at(0), &mut driver);
        assert!(player.advance(at(40), &mut driver));
        assert!(player.advance(at(100), &mut driver));
        assert_eq!(player.index(), 0);
        assert!(player.is_armed());
        assert!(player.advance(at(140), &mut driver));
        assert_eq!(player.level(), Level::High);
    }

    #[test]
    fn only_one_boundary_is_crossed_per_call() {
        let template =
            PatternTemplate::new(PatternKind::Beep, OutputId::Beeper, &TWO_STEPS, false);
        let mut player = PatternPlayer::new(template);
        let mut driver = RecordingDriver::default();

        player.start(at(0), &mut driver);
        assert!(player.advance(at(1_000), &mut driver));
        assert_eq!(player.index(), 1);
        assert!(!player.advance(at(1_059), &mut driver));
        assert!(player.advance(at(1_060), &mut driver));
        assert!(!player.is_armed());
        assert_eq!(
            driver.writes.as_slice(),
            &[
                (OutputId::Beeper, Level::Low),
                (OutputId::Beeper, Level::High),
                (OutputId::Beeper, Level::Low),
            ]
        );
    }

    #[test]
    fn halt_drives_output_low() {
        let mut player = PatternPlayer::new(PatternTemplate::new(
            PatternKind::NetworkJoin,
            OutputId::StatusLed,
            &TWO_STEPS,
            true,
        ));
        let mut driver = RecordingDriver::default();

        player.start(at(0), &mut driver);
        player.advance(at(40), &mut driver);
        player.halt(&mut driver);

        assert!(!player.is_armed());
        assert_eq!(player.level(), Level::Low);
        assert_eq!(driver.writes.last(), Some(&(OutputId::StatusLed, Level::Low)));
    }
}
