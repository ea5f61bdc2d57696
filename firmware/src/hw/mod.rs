//! ESP32-C3 bindings for the device collaborators.
//!
//! Output polarity lives in the node-core catalog; this module only turns a
//! logical level into the pin state the catalog asks for.

use core::convert::Infallible;

use embassy_time::Delay;
use esp_hal::gpio::{Flex, Input, Level as PinLevel, Output};
use tosca_drivers::dht22::{Dht22, Dht22Error};

use node_core::clock::{Instant, MonotonicClock};
use node_core::debounce::{InputId, InputReader};
use node_core::device::SystemControl;
use node_core::pattern::{Level, OutputDriver, OutputId, output_by_id};
use node_core::sensor::{Reading, SensorError, SensorSource};

/// Pin state that puts `id` at its logical idle level.
#[must_use]
pub const fn idle_pin_level(id: OutputId) -> PinLevel {
    pin_level(id, Level::Low)
}

const fn pin_level(id: OutputId, level: Level) -> PinLevel {
    if output_by_id(id).polarity.drives_high(level) {
        PinLevel::High
    } else {
        PinLevel::Low
    }
}

/// Push-pull outputs indexed by [`OutputId::as_index`].
pub struct GpioOutputs {
    pins: [Output<'static>; 4],
}

impl GpioOutputs {
    pub fn new(
        status_led: Output<'static>,
        beeper: Output<'static>,
        port1: Output<'static>,
        port2: Output<'static>,
    ) -> Self {
        Self {
            pins: [status_led, beeper, port1, port2],
        }
    }
}

impl OutputDriver for GpioOutputs {
    fn write(&mut self, output: OutputId, level: Level) {
        self.pins[output.as_index()].set_level(pin_level(output, level));
    }
}

/// Pulled-up push buttons.
pub struct GpioButtons {
    pins: [Input<'static>; 2],
}

impl GpioButtons {
    pub fn new(button1: Input<'static>, button2: Input<'static>) -> Self {
        Self {
            pins: [button1, button2],
        }
    }
}

impl InputReader for GpioButtons {
    fn level(&mut self, input: InputId) -> Level {
        Level::from_bool(self.pins[input.as_index()].is_high())
    }
}

/// DHT22 on a single open-drain data line.
pub struct Dht22Sensor {
    driver: Dht22<Flex<'static>, Delay>,
}

impl Dht22Sensor {
    pub fn new(pin: Flex<'static>) -> Self {
        Self {
            driver: Dht22::new(pin, Delay),
        }
    }
}

impl SensorSource for Dht22Sensor {
    fn read_temperature_and_humidity(&mut self) -> Result<Reading, SensorError> {
        let measurement = self.driver.read().map_err(sensor_error)?;
        Reading::new(measurement.temperature, measurement.humidity)
    }
}

fn sensor_error(err: Dht22Error<Infallible>) -> SensorError {
    match err {
        Dht22Error::Pin(_) => SensorError::Bus,
        Dht22Error::ChecksumMismatch => SensorError::Checksum,
        Dht22Error::Timeout => SensorError::Timeout,
    }
}

/// Software reset of the whole chip.
pub struct ChipControl;

impl SystemControl for ChipControl {
    fn restart(&mut self) {
        esp_hal::system::software_reset();
    }
}

/// Embassy time base truncated to the 32-bit counter the device logic uses.
pub struct EmbassyClock;

impl MonotonicClock for EmbassyClock {
    fn now(&self) -> Instant {
        let [a, b, c, d, ..] = embassy_time::Instant::now().as_millis().to_le_bytes();
        Instant::from_millis(u32::from_le_bytes([a, b, c, d]))
    }
}
