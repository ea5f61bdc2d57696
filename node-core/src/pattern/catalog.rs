//! Built-in blink and beep patterns.
//!
//! Every pattern begins low, so the first interval is the delay before the
//! first flip. One-shot patterns carry an even number of intervals and end
//! with the output back at its idle level.

use super::{OutputId, PatternKind, PatternTemplate};
use crate::clock::Milliseconds;

/// Three short flashes acknowledging a ping.
pub const PING_STEPS: [Milliseconds; 6] = [
    Milliseconds::new(100),
    Milliseconds::new(80),
    Milliseconds::new(100),
    Milliseconds::new(80),
    Milliseconds::new(100),
    Milliseconds::new(80),
];

/// Half-second pause, then a quarter-second chirp.
pub const BEEP_STEPS: [Milliseconds; 2] = [Milliseconds::new(500), Milliseconds::new(250)];

/// Slow heartbeat shown while the broker session is healthy.
pub const READY_STEPS: [Milliseconds; 2] = [Milliseconds::new(1_600), Milliseconds::new(800)];

/// Toggle period while waiting for the network to accept the node.
pub const NETWORK_JOIN_PERIOD: Milliseconds = Milliseconds::new(150);
/// Toggle period while waiting for the broker session.
pub const BROKER_JOIN_PERIOD: Milliseconds = Milliseconds::new(50);

pub const NETWORK_JOIN_STEPS: [Milliseconds; 2] = [NETWORK_JOIN_PERIOD, NETWORK_JOIN_PERIOD];
pub const BROKER_JOIN_STEPS: [Milliseconds; 2] = [BROKER_JOIN_PERIOD, BROKER_JOIN_PERIOD];

/// Length of each half of a confirmation blink.
pub const CONFIRM_PHASE: Milliseconds = Milliseconds::new(120);

/// Three blinks played before wiping settings.
pub const CONFIRM_STEPS: [Milliseconds; 6] = [CONFIRM_PHASE; 6];

pub const PING_TEMPLATE: PatternTemplate =
    PatternTemplate::new(PatternKind::Ping, OutputId::StatusLed, &PING_STEPS, false);

pub const BEEP_TEMPLATE: PatternTemplate =
    PatternTemplate::new(PatternKind::Beep, OutputId::Beeper, &BEEP_STEPS, false);

pub const READY_TEMPLATE: PatternTemplate =
    PatternTemplate::new(PatternKind::Ready, OutputId::StatusLed, &READY_STEPS, true);

pub const NETWORK_JOIN_TEMPLATE: PatternTemplate = PatternTemplate::new(
    PatternKind::NetworkJoin,
    OutputId::StatusLed,
    &NETWORK_JOIN_STEPS,
    true,
);

pub const BROKER_JOIN_TEMPLATE: PatternTemplate = PatternTemplate::new(
    PatternKind::BrokerJoin,
    OutputId::StatusLed,
    &BROKER_JOIN_STEPS,
    true,
);

pub const CONFIRM_TEMPLATE: PatternTemplate = PatternTemplate::new(
    PatternKind::Confirm,
    OutputId::StatusLed,
    &CONFIRM_STEPS,
    false,
);
