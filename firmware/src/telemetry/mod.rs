//! Console output for the device event log.
//!
//! The device loop records events into its `TelemetryRecorder`; after every
//! tick the drain prints whatever is new. On the MCU lines go out through
//! defmt, on the host they go to stdout.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use node_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Tracks the last record printed so each one is emitted once.
#[derive(Debug, Default)]
pub struct TelemetryDrain {
    last_seen: Option<EventId>,
}

impl TelemetryDrain {
    #[must_use]
    pub const fn new() -> Self {
        Self { last_seen: None }
    }

    /// Prints every record newer than the previous flush and returns how
    /// many were emitted.
    pub fn flush<const N: usize>(&mut self, recorder: &TelemetryRecorder<N>) -> usize {
        let mut emitted = 0;
        for record in recorder.newer_than(self.last_seen) {
            emit_log(record);
            self.last_seen = Some(record.id);
            emitted += 1;
        }
        emitted
    }
}

#[cfg(target_os = "none")]
fn emit_log(record: &TelemetryRecord) {
    if record.event.is_error() {
        defmt::warn!("telemetry {}", defmt::Display2Format(record));
    } else {
        defmt::info!("telemetry {}", defmt::Display2Format(record));
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(record: &TelemetryRecord) {
    println!("telemetry {record}");
}
