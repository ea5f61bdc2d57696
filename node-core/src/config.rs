//! Broker credentials and compile-time tunables.

use core::fmt;

use heapless::String;
use winnow::ascii::dec_uint;
use winnow::combinator::{eof, terminated};
use winnow::prelude::*;

use crate::clock::Milliseconds;
use crate::debounce::{DEBOUNCE_WINDOW, LONG_PRESS_THRESHOLD};

pub const HOST_CAPACITY: usize = 64;
pub const PORT_CAPACITY: usize = 8;
pub const USER_CAPACITY: usize = 32;
pub const PASS_CAPACITY: usize = 32;

/// Port used when the stored text is not a usable port number.
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Prefix shared by every topic the node publishes or subscribes to.
pub const DEFAULT_TOPIC_BASE: &str = "devices/esp01";

/// Upper bound on one network join attempt.
pub const NETWORK_JOIN_TIMEOUT: Milliseconds = Milliseconds::from_secs(15);
/// Upper bound on one broker connect attempt.
pub const BROKER_JOIN_TIMEOUT: Milliseconds = Milliseconds::from_secs(10);
/// Pause between connection lifecycle steps and after a failure.
pub const SETTLE_DELAY: Milliseconds = Milliseconds::new(1_500);

/// How long port 1 stays asserted after an "open".
pub const PORT1_PULSE: Milliseconds = Milliseconds::new(500);
pub const SENSOR_REPORT_INTERVAL: Milliseconds = Milliseconds::from_secs(300);
pub const UPTIME_REPORT_INTERVAL: Milliseconds = Milliseconds::from_secs(60);

/// Offset from UTC applied to report timestamps (UTC+5).
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 5 * 3_600;

/// Stored broker settings, kept as text the way the setup portal captures them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigFields {
    pub host: String<HOST_CAPACITY>,
    pub port: String<PORT_CAPACITY>,
    pub user: String<USER_CAPACITY>,
    pub pass: String<PASS_CAPACITY>,
}

impl ConfigFields {
    /// Builds a field set from borrowed text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FieldTooLong`] when a value exceeds its capacity.
    pub fn new(host: &str, port: &str, user: &str, pass: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            host: copy_field("host", host)?,
            port: copy_field("port", port)?,
            user: copy_field("user", user)?,
            pass: copy_field("pass", pass)?,
        })
    }

    #[must_use]
    pub fn has_host(&self) -> bool {
        !self.host.trim().is_empty()
    }

    /// Resolves the broker port, falling back to [`DEFAULT_BROKER_PORT`].
    #[must_use]
    pub fn resolve_port(&self) -> PortResolution {
        resolve_port(&self.port)
    }
}

fn copy_field<const N: usize>(field: &'static str, value: &str) -> Result<String<N>, ConfigError> {
    String::try_from(value).map_err(|_| ConfigError::FieldTooLong(field))
}

/// Outcome of interpreting the stored port text.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PortResolution {
    pub port: u16,
    pub defaulted: bool,
}

fn port_number(input: &mut &str) -> ModalResult<u16> {
    terminated(dec_uint, eof).parse_next(input)
}

/// Parses decimal port text. Blank, non-numeric, zero, or out-of-range text
/// resolves to [`DEFAULT_BROKER_PORT`].
#[must_use]
pub fn resolve_port(text: &str) -> PortResolution {
    match port_number.parse(text.trim()) {
        Ok(port) if port != 0 => PortResolution {
            port,
            defaulted: false,
        },
        _ => PortResolution {
            port: DEFAULT_BROKER_PORT,
            defaulted: true,
        },
    }
}

/// Failures surfaced by a [`ConfigStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// Nothing has been stored yet.
    Missing,
    /// Stored data could not be decoded.
    Corrupt,
    /// The backing medium rejected the operation.
    Storage,
    /// A field exceeded its fixed capacity.
    FieldTooLong(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing => f.write_str("no stored configuration"),
            ConfigError::Corrupt => f.write_str("stored configuration is corrupt"),
            ConfigError::Storage => f.write_str("configuration storage failure"),
            ConfigError::FieldTooLong(field) => write!(f, "config field `{field}` is too long"),
        }
    }
}

/// Persisted broker settings.
pub trait ConfigStore {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when nothing usable is stored.
    fn load(&mut self) -> Result<ConfigFields, ConfigError>;

    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the medium rejects the write.
    fn save(&mut self, fields: &ConfigFields) -> Result<(), ConfigError>;
}

/// RAM-backed store used by the emulator and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryConfigStore {
    fields: Option<ConfigFields>,
    corrupt: bool,
}

impl MemoryConfigStore {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            fields: None,
            corrupt: false,
        }
    }

    #[must_use]
    pub const fn with_fields(fields: ConfigFields) -> Self {
        Self {
            fields: Some(fields),
            corrupt: false,
        }
    }

    /// Makes the next loads fail as if the stored blob were damaged.
    pub fn mark_corrupt(&mut self) {
        self.corrupt = true;
    }

    #[must_use]
    pub fn stored(&self) -> Option<&ConfigFields> {
        self.fields.as_ref()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&mut self) -> Result<ConfigFields, ConfigError> {
        if self.corrupt {
            return Err(ConfigError::Corrupt);
        }
        self.fields.clone().ok_or(ConfigError::Missing)
    }

    fn save(&mut self, fields: &ConfigFields) -> Result<(), ConfigError> {
        self.fields = Some(fields.clone());
        self.corrupt = false;
        Ok(())
    }
}

/// Connection lifecycle tunables.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupervisorConfig {
    pub network_timeout: Milliseconds,
    pub broker_timeout: Milliseconds,
    pub settle_delay: Milliseconds,
}

impl SupervisorConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            network_timeout: NETWORK_JOIN_TIMEOUT,
            broker_timeout: BROKER_JOIN_TIMEOUT,
            settle_delay: SETTLE_DELAY,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Device-level tunables.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfig {
    pub topic_base: &'static str,
    pub debounce_window: Milliseconds,
    pub long_press: Milliseconds,
    pub port1_pulse: Milliseconds,
    pub sensor_interval: Milliseconds,
    pub uptime_interval: Milliseconds,
    pub utc_offset_secs: i32,
    pub supervisor: SupervisorConfig,
}

impl DeviceConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            topic_base: DEFAULT_TOPIC_BASE,
            debounce_window: DEBOUNCE_WINDOW,
            long_press: LONG_PRESS_THRESHOLD,
            port1_pulse: PORT1_PULSE,
            sensor_interval: SENSOR_REPORT_INTERVAL,
            uptime_interval: UPTIME_REPORT_INTERVAL,
            utc_offset_secs: DEFAULT_UTC_OFFSET_SECS,
            supervisor: SupervisorConfig::new(),
        }
    }

    #[must_use]
    pub const fn with_topic_base(mut self, base: &'static str) -> Self {
        self.topic_base = base;
        self
    }

    #[must_use]
    pub const fn with_utc_offset(mut self, secs: i32) -> Self {
        self.utc_offset_secs = secs;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}
