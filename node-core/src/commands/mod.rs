//! Topic layout and decoding of inbound broker messages.
//!
//! Every topic lives under a common base (`devices/esp01` by default). Inbound
//! messages are matched against the exact `set/...` suffixes and decoded into a
//! closed [`Command`] set so the dispatcher can match exhaustively.

use core::fmt::{self, Write as _};

use heapless::String;
use winnow::ascii::dec_uint;
use winnow::combinator::{alt, eof, preceded, terminated};
use winnow::prelude::*;

use crate::config::DEFAULT_TOPIC_BASE;
use crate::pattern::OutputId;

/// Capacity for a fully qualified topic name.
pub const TOPIC_CAPACITY: usize = 96;

/// Switchable ports exposed to the broker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PortId {
    /// Momentary output, pulsed on "open".
    Port1,
    /// Latching output.
    Port2,
}

impl PortId {
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            PortId::Port1 => 1,
            PortId::Port2 => 2,
        }
    }

    #[must_use]
    pub const fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(PortId::Port1),
            2 => Some(PortId::Port2),
            _ => None,
        }
    }

    #[must_use]
    pub const fn output(self) -> OutputId {
        match self {
            PortId::Port1 => OutputId::Port1,
            PortId::Port2 => OutputId::Port2,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.number())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PortAction {
    Open,
    Close,
}

impl PortAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PortAction::Open => "open",
            PortAction::Close => "close",
        }
    }
}

impl fmt::Display for PortAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topics the node publishes to or subscribes on, relative to the base.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Topic {
    SetPing,
    GetPing,
    SetPort(PortId),
    GetPort(PortId),
    SetBeeper,
    GetBeeper,
    SetSensorData,
    GetSensorData,
    Uptime,
    Log,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::SetPing => f.write_str("set/ping"),
            Topic::GetPing => f.write_str("get/ping"),
            Topic::SetPort(port) => write!(f, "set/{port}"),
            Topic::GetPort(port) => write!(f, "get/{port}"),
            Topic::SetBeeper => f.write_str("set/beeper"),
            Topic::GetBeeper => f.write_str("get/beeper"),
            Topic::SetSensorData => f.write_str("set/sensor_data"),
            Topic::GetSensorData => f.write_str("get/sensor_data"),
            Topic::Uptime => f.write_str("uptime"),
            Topic::Log => f.write_str("log"),
        }
    }
}

/// Inbound topics subscribed after every broker connect.
pub const SUBSCRIPTIONS: [Topic; 5] = [
    Topic::SetPing,
    Topic::SetSensorData,
    Topic::SetBeeper,
    Topic::SetPort(PortId::Port1),
    Topic::SetPort(PortId::Port2),
];

/// A base plus suffix did not fit in [`TOPIC_CAPACITY`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TopicTooLong;

impl fmt::Display for TopicTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("topic exceeds capacity")
    }
}

/// Builds and strips fully qualified topic names.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TopicTree {
    base: &'static str,
}

impl TopicTree {
    #[must_use]
    pub const fn new(base: &'static str) -> Self {
        Self { base }
    }

    #[must_use]
    pub const fn base(&self) -> &'static str {
        self.base
    }

    /// Fully qualified name for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TopicTooLong`] when the base is too long to fit.
    pub fn render(&self, topic: Topic) -> Result<String<TOPIC_CAPACITY>, TopicTooLong> {
        let mut name = String::new();
        write!(name, "{}/{topic}", self.base).map_err(|_| TopicTooLong)?;
        Ok(name)
    }

    /// Suffix of `topic` below the base, if it belongs to this tree.
    #[must_use]
    pub fn strip<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic.strip_prefix(self.base)?.strip_prefix('/')
    }

    /// Decodes an inbound message into a [`Command`].
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the topic is not one of the `set/...`
    /// subscriptions or the payload is not the expected literal.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Command, DecodeError> {
        let suffix = self.strip(topic).ok_or(DecodeError::UnknownTopic)?;
        let inbound = inbound_topic
            .parse(suffix)
            .map_err(|_| DecodeError::UnknownTopic)?;
        let payload = core::str::from_utf8(payload).map_err(|_| DecodeError::UnexpectedPayload)?;

        match inbound {
            InboundTopic::Ping => expect_literal(payload, "ping").map(|()| Command::Ping),
            InboundTopic::SensorData => {
                expect_literal(payload, "data").map(|()| Command::SensorData)
            }
            InboundTopic::Beeper => expect_literal(payload, "beep").map(|()| Command::Beep),
            InboundTopic::Port(number) => {
                let port = PortId::from_number(number).ok_or(DecodeError::UnknownPort(number))?;
                let action = match payload {
                    "open" => PortAction::Open,
                    "close" => PortAction::Close,
                    _ => return Err(DecodeError::UnexpectedPayload),
                };
                if port == PortId::Port1 && action == PortAction::Close {
                    return Err(DecodeError::UnsupportedAction { port, action });
                }
                Ok(Command::Port { port, action })
            }
        }
    }
}

impl Default for TopicTree {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_BASE)
    }
}

/// Decoded inbound request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Ping,
    SensorData,
    Beep,
    Port { port: PortId, action: PortAction },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => f.write_str("ping"),
            Command::SensorData => f.write_str("sensor-data"),
            Command::Beep => f.write_str("beep"),
            Command::Port { port, action } => write!(f, "{port} {action}"),
        }
    }
}

/// Reasons an inbound message is dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    UnknownTopic,
    UnexpectedPayload,
    UnknownPort(u8),
    UnsupportedAction { port: PortId, action: PortAction },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownTopic => f.write_str("unknown topic"),
            DecodeError::UnexpectedPayload => f.write_str("unexpected payload"),
            DecodeError::UnknownPort(number) => write!(f, "invalid port number {number}"),
            DecodeError::UnsupportedAction { port, action } => {
                write!(f, "{port} does not support {action}")
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum InboundTopic {
    Ping,
    SensorData,
    Beeper,
    Port(u8),
}

fn inbound_topic(input: &mut &str) -> ModalResult<InboundTopic> {
    terminated(
        alt((
            "set/ping".value(InboundTopic::Ping),
            "set/sensor_data".value(InboundTopic::SensorData),
            "set/beeper".value(InboundTopic::Beeper),
            preceded("set/port", dec_uint).map(InboundTopic::Port),
        )),
        eof,
    )
    .parse_next(input)
}

fn expect_literal(payload: &str, expected: &str) -> Result<(), DecodeError> {
    if payload == expected {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedPayload)
    }
}
