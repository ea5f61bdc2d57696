//! Temperature and humidity readings and their broker payload.

use core::fmt::{self, Write as _};

use heapless::String;

/// Capacity for the JSON sensor report.
pub const SENSOR_PAYLOAD_CAPACITY: usize = 128;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

impl Reading {
    /// # Errors
    ///
    /// Returns [`SensorError::NotANumber`] when either value is NaN, which is
    /// how the sensor reports a failed conversion.
    pub fn new(temperature_c: f32, humidity_pct: f32) -> Result<Self, SensorError> {
        if temperature_c.is_nan() || humidity_pct.is_nan() {
            return Err(SensorError::NotANumber);
        }
        Ok(Self {
            temperature_c,
            humidity_pct,
        })
    }

    /// Renders the report published on `get/sensor_data`, stamped with
    /// `taken_at` in the `Time` field.
    ///
    /// # Errors
    ///
    /// Returns [`fmt::Error`] if the payload would exceed its capacity.
    pub fn to_payload(
        &self,
        taken_at: impl fmt::Display,
    ) -> Result<String<SENSOR_PAYLOAD_CAPACITY>, fmt::Error> {
        let mut payload = String::new();
        write!(
            payload,
            r#"{{"Temp":"{:.2}","TempUnit":"C","Hum":"{:.2}","Time":"{}"}}"#,
            self.temperature_c, self.humidity_pct, taken_at
        )?;
        Ok(payload)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorError {
    /// The sensor did not answer in time.
    Timeout,
    /// The frame checksum did not match.
    Checksum,
    /// The bus or pin reported an error.
    Bus,
    /// A value came back as NaN.
    NotANumber,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Timeout => f.write_str("sensor timeout"),
            SensorError::Checksum => f.write_str("sensor checksum mismatch"),
            SensorError::Bus => f.write_str("sensor bus error"),
            SensorError::NotANumber => f.write_str("sensor returned NaN"),
        }
    }
}

/// Source of temperature and humidity samples.
pub trait SensorSource {
    /// # Errors
    ///
    /// Returns a [`SensorError`] when no valid sample could be taken.
    fn read_temperature_and_humidity(&mut self) -> Result<Reading, SensorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::DateTime;
    use crate::uptime::UptimeSnapshot;

    #[test]
    fn nan_is_rejected() {
        assert_eq!(Reading::new(f32::NAN, 40.0), Err(SensorError::NotANumber));
        assert_eq!(Reading::new(21.0, f32::NAN), Err(SensorError::NotANumber));
    }

    #[test]
    fn payload_matches_report_layout() {
        let reading = Reading::new(23.456, 41.0).expect("valid");
        let taken_at = UptimeSnapshot {
            days: 0,
            hours: 1,
            minutes: 2,
            seconds: 3,
        };
        let payload = reading.to_payload(taken_at).expect("fits");
        assert_eq!(
            payload.as_str(),
            r#"{"Temp":"23.46","TempUnit":"C","Hum":"41.00","Time":"0:01:02:03"}"#
        );
    }

    #[test]
    fn payload_carries_calendar_time_when_synced() {
        let reading = Reading::new(-4.5, 88.25).expect("valid");
        // 2024-03-01T12:00:05
        let taken_at = DateTime::from_unix_seconds(1_709_294_405);
        let payload = reading.to_payload(taken_at).expect("fits");
        assert_eq!(
            payload.as_str(),
            r#"{"Temp":"-4.50","TempUnit":"C","Hum":"88.25","Time":"01-Mar-2024 12:00:05"}"#
        );
    }
}
