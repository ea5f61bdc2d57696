#![no_std]

// Device logic for the sensor/actuator node.
//
// Everything here is hardware-agnostic and free of the standard library so the
// same loop runs on the MCU firmware and in the host emulator. Hardware and
// network access come in through the traits in `pattern`, `debounce`,
// `sensor`, `config`, `calendar`, `supervisor`, and `device`.

pub mod calendar;
pub mod clock;
pub mod commands;
pub mod config;
pub mod debounce;
pub mod device;
pub mod pattern;
pub mod sensor;
pub mod supervisor;
pub mod telemetry;
pub mod timer;
pub mod uptime;
