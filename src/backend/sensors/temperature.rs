//! Coil temperature probe
//!
//! The probe streams lines of the form `T<ticks>\n`. Ticks convert to degrees
//! as `ticks * 80 / 1000 / 60`. Anything below [`TEMP_MIN`] or above
//! [`TEMP_MAX`] is reported as [`TEMP_MIN`]: the probe idles at ambient and
//! the charts expect a continuous series, so out-of-range values are pinned
//! to the cold floor instead of being dropped.

use super::{decode_line, parse_number, Sensor, SerialLink};
use crate::backend::transport::Connector;
use crate::config::SerialDeviceConfig;
use crate::error::{Result, ResultExt};
use crate::types::Reading;
use std::time::Duration;

/// Frame marker byte
pub const TEMP_MARKER: char = 'T';

/// Lower bound of the plausible range, also the value reported outside it
pub const TEMP_MIN: f64 = 25.0;

/// Upper bound of the plausible range
pub const TEMP_MAX: f64 = 300.0;

/// Convert raw encoder ticks to degrees Celsius, pinning implausible values
pub fn convert_temperature(ticks: f64) -> f64 {
    let celsius = ticks * 80.0 / 1000.0 / 60.0;
    if !(TEMP_MIN..=TEMP_MAX).contains(&celsius) {
        TEMP_MIN
    } else {
        celsius
    }
}

/// Parse one wire line
pub fn parse_temperature_frame(line: &[u8]) -> Reading {
    let text = decode_line(line)?;
    let payload = text.strip_prefix(TEMP_MARKER)?;
    parse_number(payload).map(convert_temperature)
}

/// Driver for the coil temperature probe
pub struct TemperatureSensor {
    link: SerialLink,
}

impl TemperatureSensor {
    pub fn new(port: impl Into<String>, baudrate: u32, timeout: Duration) -> Self {
        Self {
            link: SerialLink::new(port, baudrate, timeout),
        }
    }

    pub fn from_config(config: &SerialDeviceConfig, timeout: Duration) -> Self {
        Self::new(config.port.clone(), config.baudrate, timeout)
    }
}

impl Sensor for TemperatureSensor {
    fn name(&self) -> &'static str {
        "temp"
    }

    fn n_vals(&self) -> usize {
        1
    }

    fn enabled(&self) -> bool {
        self.link.is_open()
    }

    fn start(&mut self, connector: &dyn Connector) -> Result<()> {
        self.link
            .open(connector)
            .context("Failed to start temperature sensor")
    }

    fn read(&mut self) -> Vec<Reading> {
        let reading = self.link.read_line().and_then(|line| {
            let parsed = parse_temperature_frame(&line);
            if parsed.is_none() {
                tracing::trace!("Unusable temperature frame: {:?}", String::from_utf8_lossy(&line));
            }
            parsed
        });
        vec![reading]
    }

    fn flush(&mut self) {
        self.link.flush();
    }

    fn close(&mut self) {
        self.link.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim_transport::SimConnector;

    #[test]
    fn test_in_range_conversion_passes_through() {
        // 30000 ticks -> 40 C
        assert_eq!(parse_temperature_frame(b"T30000\n"), Some(40.0));
        // exact bounds are kept
        assert_eq!(convert_temperature(25.0 * 750.0), 25.0);
        assert_eq!(convert_temperature(300.0 * 750.0), 300.0);
    }

    #[test]
    fn test_out_of_range_pins_to_cold_floor() {
        assert_eq!(parse_temperature_frame(b"T0\n"), Some(TEMP_MIN));
        assert_eq!(parse_temperature_frame(b"T-5000\n"), Some(TEMP_MIN));
        assert_eq!(parse_temperature_frame(b"T999999\n"), Some(TEMP_MIN));
        assert_eq!(convert_temperature(300.1 * 750.0), TEMP_MIN);
    }

    #[test]
    fn test_malformed_frames_are_missing() {
        assert_eq!(parse_temperature_frame(b"H30000\n"), None);
        assert_eq!(parse_temperature_frame(b"T\n"), None);
        assert_eq!(parse_temperature_frame(b"Tabc\n"), None);
        assert_eq!(parse_temperature_frame(b"\n"), None);
        assert_eq!(parse_temperature_frame(&[b'T', 0xc3, 0x28, b'\n']), None);
    }

    #[test]
    fn test_driver_reads_and_closes() {
        let connector = SimConnector::new();
        let handle = connector.add_device("/dev/ttyUSB0");
        let mut sensor = TemperatureSensor::new("/dev/ttyUSB0", 115_200, Duration::from_millis(5));

        assert!(!sensor.enabled());
        // Idempotent close before start
        sensor.close();

        sensor.start(&connector).unwrap();
        assert!(sensor.enabled());

        handle.push_line("T37500");
        assert_eq!(sensor.read(), vec![Some(50.0)]);

        // Nothing on the wire
        assert_eq!(sensor.read(), vec![None]);

        handle.push_line("garbage");
        assert_eq!(sensor.read(), vec![None]);

        sensor.close();
        sensor.close();
        assert!(!handle.is_open());
        assert_eq!(sensor.read(), vec![None]);
    }

    #[test]
    fn test_start_on_missing_port_fails() {
        let connector = SimConnector::new();
        let mut sensor = TemperatureSensor::new("/dev/ttyUSB0", 115_200, Duration::from_millis(5));
        let err = sensor.start(&connector).unwrap_err();
        assert!(err.is_transport());
        assert!(!sensor.enabled());
    }
}
