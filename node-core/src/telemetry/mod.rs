//! Device event log shared by firmware and host targets.
//!
//! Events land in a fixed-capacity ring with monotonically increasing ids so a
//! consumer (defmt on the MCU, stdout in the emulator) can drain everything
//! newer than the last id it printed. A subset of events is also mirrored to
//! the broker's log topic while a session is up.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::clock::Instant;
use crate::commands::{Command, DecodeError, PortId};
use crate::config::ConfigError;
use crate::debounce::{InputId, PressKind};
use crate::sensor::SensorError;
use crate::supervisor::{ClientError, FailureReason, LinkInfo};
use crate::uptime::UptimeSnapshot;

/// Identifier assigned to each telemetry record.
pub type EventId = u32;

/// Events kept before the oldest is overwritten.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Why the settings reset was requested.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetTrigger {
    BootButton,
    LongPress,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DeviceEventKind {
    Boot,
    ConfigLoadFailed(ConfigError),
    ConfigWipeFailed(ConfigError),
    PortDefaulted(u16),
    NetworkJoinStarted,
    NetworkJoined(LinkInfo),
    BrokerJoinStarted(u16),
    BrokerConnected,
    ConnectFailed(FailureReason),
    LinkLost,
    BrokerLost,
    SystemReady,
    CommandReceived(Command),
    CommandRejected(DecodeError),
    PingReplied,
    BeeperStarted,
    PortOpened(PortId),
    PortClosed(PortId),
    PortReleased(PortId),
    ButtonReleased(InputId, PressKind),
    UptimeReported(UptimeSnapshot),
    SensorReported { temperature_c: f32, humidity_pct: f32 },
    SensorFailed(SensorError),
    PublishFailed(ClientError),
    ResetRequested(ResetTrigger),
    Restarting,
}

impl DeviceEventKind {
    /// Events that are also published on the broker's log topic.
    #[must_use]
    pub const fn mirrors_remotely(&self) -> bool {
        matches!(
            self,
            DeviceEventKind::BrokerConnected
                | DeviceEventKind::SystemReady
                | DeviceEventKind::PortOpened(PortId::Port1)
                | DeviceEventKind::UptimeReported(_)
                | DeviceEventKind::SensorFailed(_)
        )
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            DeviceEventKind::ConfigLoadFailed(_)
                | DeviceEventKind::ConfigWipeFailed(_)
                | DeviceEventKind::PortDefaulted(_)
                | DeviceEventKind::ConnectFailed(_)
                | DeviceEventKind::CommandRejected(_)
                | DeviceEventKind::SensorFailed(_)
                | DeviceEventKind::PublishFailed(_)
        )
    }
}

impl fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEventKind::Boot => f.write_str("booting"),
            DeviceEventKind::ConfigLoadFailed(err) => {
                write!(f, "ERR: {err}, using blank broker settings")
            }
            DeviceEventKind::ConfigWipeFailed(err) => write!(f, "ERR: wipe failed: {err}"),
            DeviceEventKind::PortDefaulted(port) => {
                write!(f, "ERR: invalid broker port, using default port {port}")
            }
            DeviceEventKind::NetworkJoinStarted => f.write_str("network: joining"),
            DeviceEventKind::NetworkJoined(info) => write!(f, "network: joined, ip {info}"),
            DeviceEventKind::BrokerJoinStarted(port) => {
                write!(f, "broker: connecting on port {port}")
            }
            DeviceEventKind::BrokerConnected => f.write_str("broker: connected"),
            DeviceEventKind::ConnectFailed(reason) => write!(f, "ERR: {reason}"),
            DeviceEventKind::LinkLost => f.write_str("network: link lost"),
            DeviceEventKind::BrokerLost => f.write_str("broker: session lost"),
            DeviceEventKind::SystemReady => f.write_str("system ready"),
            DeviceEventKind::CommandReceived(command) => write!(f, "command: {command}"),
            DeviceEventKind::CommandRejected(err) => write!(f, "ERR: command dropped: {err}"),
            DeviceEventKind::PingReplied => f.write_str("ping replied"),
            DeviceEventKind::BeeperStarted => f.write_str("beeper started"),
            DeviceEventKind::PortOpened(port) => write!(f, "{port}: OPEN"),
            DeviceEventKind::PortClosed(port) => write!(f, "{port}: CLOSED"),
            DeviceEventKind::PortReleased(port) => write!(f, "{port}: released"),
            DeviceEventKind::ButtonReleased(input, kind) => {
                let kind = match kind {
                    PressKind::Short => "short",
                    PressKind::Long => "long",
                };
                write!(f, "{input}: {kind} press")
            }
            DeviceEventKind::UptimeReported(uptime) => write!(f, "system uptime: {uptime}"),
            DeviceEventKind::SensorReported {
                temperature_c,
                humidity_pct,
            } => write!(f, "sensor: {temperature_c:.2}C {humidity_pct:.2}%"),
            DeviceEventKind::SensorFailed(err) => {
                write!(f, "ERR: failed to read from sensor ({err})")
            }
            DeviceEventKind::PublishFailed(err) => write!(f, "ERR: publish failed: {err}"),
            DeviceEventKind::ResetRequested(ResetTrigger::BootButton) => {
                f.write_str("button1 held at boot, resetting settings")
            }
            DeviceEventKind::ResetRequested(ResetTrigger::LongPress) => {
                f.write_str("button1 long press, resetting settings")
            }
            DeviceEventKind::Restarting => f.write_str("restarting"),
        }
    }
}

/// One device event with its id and tick timestamp.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Instant,
    pub event: DeviceEventKind,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.timestamp, self.event)
    }
}

/// Ring storage behind the recorder.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records device events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Empty recorder; the first event gets id 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Retained events, oldest first.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Records that are newer than `last_seen`, oldest first.
    pub fn newer_than(&self, last_seen: Option<EventId>) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring
            .oldest_ordered()
            .filter(move |record| last_seen.is_none_or(|seen| is_newer(record.id, seen)))
    }

    /// Last event written.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Retained event count, capped at `CAPACITY`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Nothing recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an event and returns its id.
    pub fn record(&mut self, event: DeviceEventKind, timestamp: Instant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
        });

        id
    }
}

/// Wrap-aware id comparison.
const fn is_newer(id: EventId, seen: EventId) -> bool {
    let delta = id.wrapping_sub(seen);
    delta != 0 && delta < 0x8000_0000
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
