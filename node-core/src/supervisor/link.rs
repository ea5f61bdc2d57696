//! Collaborator seams for the network link and the broker session.
//!
//! Implementations may either finish an attempt inside the call (bounded by
//! the timeout they are given) or return an `InProgress` error and be polled
//! again on the next tick. The supervisor treats both styles the same way and
//! enforces its own attempt deadline. When that deadline passes it cancels the
//! attempt, and a result that arrives afterwards must not be reported against
//! the next one.

use core::fmt;

use heapless::{String, Vec};

use crate::clock::Milliseconds;
use crate::commands::TOPIC_CAPACITY;

/// Largest inbound payload buffered per message.
pub const INBOUND_PAYLOAD_CAPACITY: usize = 128;

/// Addressing details reported after a successful network join.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LinkInfo {
    pub address: [u8; 4],
}

impl LinkInfo {
    #[must_use]
    pub const fn new(address: [u8; 4]) -> Self {
        Self { address }
    }
}

impl fmt::Display for LinkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.address;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// Network join failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinError {
    /// The attempt is still running; poll again.
    InProgress,
    /// The attempt exceeded its timeout.
    Timeout,
    /// The access point refused the credentials.
    Rejected,
    /// No network credentials are stored.
    NoCredentials,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::InProgress => f.write_str("join in progress"),
            JoinError::Timeout => f.write_str("join timed out"),
            JoinError::Rejected => f.write_str("join rejected"),
            JoinError::NoCredentials => f.write_str("no network credentials"),
        }
    }
}

/// Broker connect failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectError {
    /// The attempt is still running; poll again.
    InProgress,
    /// The attempt exceeded its timeout.
    Timeout,
    /// The broker could not be reached.
    Unreachable,
    /// The broker answered with a non-success return code.
    Refused(u8),
    /// No broker host is configured.
    NotConfigured,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::InProgress => f.write_str("connect in progress"),
            ConnectError::Timeout => f.write_str("connect timed out"),
            ConnectError::Unreachable => f.write_str("broker unreachable"),
            ConnectError::Refused(code) => write!(f, "broker refused connection ({code})"),
            ConnectError::NotConfigured => f.write_str("no broker configured"),
        }
    }
}

/// Failures for operations on an established session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClientError {
    NotConnected,
    /// The outbound queue is full; the message was dropped.
    QueueFull,
    /// Topic or payload exceeded the transport buffers.
    TooLarge,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotConnected => f.write_str("not connected"),
            ClientError::QueueFull => f.write_str("outbound queue full"),
            ClientError::TooLarge => f.write_str("message too large"),
        }
    }
}

/// Message delivered by the broker, owned so the client holds no borrow while
/// the main loop handles it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InboundMessage {
    pub topic: String<TOPIC_CAPACITY>,
    pub payload: Vec<u8, INBOUND_PAYLOAD_CAPACITY>,
}

impl InboundMessage {
    /// # Errors
    ///
    /// Returns [`ClientError::TooLarge`] when either part exceeds its buffer.
    pub fn new(topic: &str, payload: &[u8]) -> Result<Self, ClientError> {
        Ok(Self {
            topic: String::try_from(topic).map_err(|_| ClientError::TooLarge)?,
            payload: Vec::from_slice(payload).map_err(|_| ClientError::TooLarge)?,
        })
    }
}

/// Station-mode network access.
pub trait NetworkJoiner {
    /// Starts or continues a join attempt bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InProgress`] while a non-blocking attempt is
    /// pending, or the terminal failure.
    fn join(&mut self, timeout: Milliseconds) -> Result<LinkInfo, JoinError>;

    /// Abandons the pending attempt after the caller gave up on it.
    fn cancel_join(&mut self) {}

    /// Returns `true` while the link is associated and addressed.
    fn is_link_up(&self) -> bool;

    /// Device name announced on the network.
    fn current_identity(&self) -> &str;

    /// Drops stored network credentials so the next boot enters setup.
    fn forget_credentials(&mut self);
}

/// Publish/subscribe broker session.
pub trait MessagingClient {
    /// Starts or continues a connect attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InProgress`] while a non-blocking attempt is
    /// pending, or the terminal failure.
    fn connect(&mut self, host: &str, port: u16, user: &str, pass: &str)
    -> Result<(), ConnectError>;

    /// Abandons the pending connect after the caller gave up on it.
    fn cancel_connect(&mut self) {}

    /// # Errors
    ///
    /// Returns a [`ClientError`] when the request cannot be queued.
    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError>;

    /// # Errors
    ///
    /// Returns a [`ClientError`] when the message cannot be queued.
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), ClientError>;

    fn is_connected(&self) -> bool;

    /// Next buffered inbound message, if any.
    fn poll(&mut self) -> Option<InboundMessage>;
}
