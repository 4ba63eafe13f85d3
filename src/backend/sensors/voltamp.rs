//! Battery voltage/current/temperature meter
//!
//! The meter streams several record types; only `:r50` records carry the
//! values we chart. A read scans the byte stream for the marker, then takes
//! the rest of the line and splits it on commas:
//!
//! ```text
//! :r50=1,47,1258,352,0,0,0,0,125,
//!          ^^^^ ^^^         ^^^
//!          [2]  [3]         [8]
//!          V*100 A*100      temperature (mod 100)
//! ```
//!
//! The whole scan is bounded by the configured timeout, so a silent meter
//! costs at most that long per tick.

use super::{decode_line, parse_number, Sensor, SerialLink};
use crate::backend::transport::{Connector, Transport};
use crate::config::BatteryConfig;
use crate::error::{Result, ResultExt};
use crate::types::Reading;
use std::time::{Duration, Instant};

/// Marker that starts a measurement record
pub const FRAME_MARKER: &[u8] = b":r50";

const VOLTAGE_FIELD: usize = 2;
const CURRENT_FIELD: usize = 3;
const TEMPERATURE_FIELD: usize = 8;

/// Decode the payload following the marker into voltage, current, temperature
pub fn parse_voltamp_payload(payload: &str) -> Option<[f64; 3]> {
    let fields: Vec<&str> = payload.split(',').collect();
    let field = |idx: usize| fields.get(idx).and_then(|f| parse_number(f));

    let voltage = field(VOLTAGE_FIELD)? / 100.0;
    let current = field(CURRENT_FIELD)? / 100.0;
    let temperature = field(TEMPERATURE_FIELD)?.rem_euclid(100.0);
    Some([voltage, current, temperature])
}

/// Scan for `marker` and return the bytes after it up to the end of the line
///
/// Returns `None` if the marker or the line end does not arrive before
/// `deadline`, or if the transport faults.
pub fn scan_frame(transport: &mut dyn Transport, marker: &[u8], deadline: Instant) -> Option<Vec<u8>> {
    let mut matched = 0;
    while matched < marker.len() {
        if Instant::now() >= deadline {
            return None;
        }
        match transport.read_byte() {
            Ok(Some(byte)) if byte == marker[matched] => matched += 1,
            Ok(Some(byte)) => matched = usize::from(byte == marker[0]),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Frame scan aborted: {}", e);
                return None;
            }
        }
    }

    let mut payload = Vec::new();
    loop {
        if Instant::now() >= deadline {
            return None;
        }
        match transport.read_byte() {
            Ok(Some(b'\n')) => return Some(payload),
            Ok(Some(byte)) => payload.push(byte),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Frame scan aborted: {}", e);
                return None;
            }
        }
    }
}

/// Driver for the battery meter
pub struct VoltAmpSensor {
    link: SerialLink,
    scan_timeout: Duration,
}

impl VoltAmpSensor {
    pub fn new(port: impl Into<String>, baudrate: u32, scan_timeout: Duration) -> Self {
        // Short per-byte timeout so the scan deadline is checked often
        let byte_timeout = (scan_timeout / 10).max(Duration::from_millis(1));
        Self {
            link: SerialLink::new(port, baudrate, byte_timeout),
            scan_timeout,
        }
    }

    pub fn from_config(config: &BatteryConfig) -> Self {
        Self::new(
            config.port.clone(),
            config.baudrate,
            Duration::from_millis(config.timeout_ms),
        )
    }
}

impl Sensor for VoltAmpSensor {
    fn name(&self) -> &'static str {
        "batt"
    }

    fn n_vals(&self) -> usize {
        3
    }

    fn enabled(&self) -> bool {
        self.link.is_open()
    }

    fn start(&mut self, connector: &dyn Connector) -> Result<()> {
        self.link.open(connector).context("Failed to start battery meter")
    }

    fn read(&mut self) -> Vec<Reading> {
        let deadline = Instant::now() + self.scan_timeout;
        let values = self
            .link
            .transport()
            .and_then(|t| scan_frame(t, FRAME_MARKER, deadline))
            .and_then(|payload| decode_line(&payload).and_then(parse_voltamp_payload));

        match values {
            Some([v, a, t]) => vec![Some(v), Some(a), Some(t)],
            None => {
                tracing::trace!("No usable battery frame within {:?}", self.scan_timeout);
                self.missing()
            }
        }
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
    fn test_payload_fields() {
        assert_eq!(
            parse_voltamp_payload("x,y,30,150,0,0,0,0,42"),
            Some([0.30, 1.50, 42.0])
        );
        assert_eq!(
            parse_voltamp_payload("=1,47,1258,352,0,0,0,0,125,"),
            Some([12.58, 3.52, 25.0])
        );
    }

    #[test]
    fn test_temperature_wraps_modulo_100() {
        let [_, _, t] = parse_voltamp_payload("a,b,0,0,0,0,0,0,-7").unwrap();
        assert_eq!(t, 93.0);
    }

    #[test]
    fn test_short_or_garbled_payload_is_missing() {
        assert_eq!(parse_voltamp_payload("a,b,30,150"), None);
        assert_eq!(parse_voltamp_payload("a,b,xx,150,0,0,0,0,42"), None);
        assert_eq!(parse_voltamp_payload(""), None);
    }

    #[test]
    fn test_driver_skips_other_records() {
        let connector = SimConnector::new();
        let handle = connector.add_device("/dev/ttyUSB1");
        let mut sensor = VoltAmpSensor::new("/dev/ttyUSB1", 115_200, Duration::from_millis(100));
        sensor.start(&connector).unwrap();

        handle.push(b"\r:r51=1,0,0,\n:r:r50=1,47,1200,250,0,0,0,0,130,\r\n");
        assert_eq!(sensor.read(), vec![Some(12.0), Some(2.5), Some(30.0)]);
        sensor.close();
    }

    #[test]
    fn test_driver_times_out_without_marker() {
        let connector = SimConnector::new();
        let handle = connector.add_device("/dev/ttyUSB1");
        let mut sensor = VoltAmpSensor::new("/dev/ttyUSB1", 115_200, Duration::from_millis(20));
        sensor.start(&connector).unwrap();

        handle.push(b":r51=1,0,0,\n");
        let started = Instant::now();
        assert_eq!(sensor.read(), vec![None, None, None]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_driver_short_frame_is_missing() {
        let connector = SimConnector::new();
        let handle = connector.add_device("/dev/ttyUSB1");
        let mut sensor = VoltAmpSensor::new("/dev/ttyUSB1", 115_200, Duration::from_millis(50));
        sensor.start(&connector).unwrap();

        handle.push(b":r50=1,47,1200\n");
        assert_eq!(sensor.read(), vec![None, None, None]);
    }

    #[test]
    fn test_unstarted_driver_reads_missing() {
        let mut sensor = VoltAmpSensor::new("/dev/ttyUSB1", 115_200, Duration::from_millis(5));
        assert!(!sensor.enabled());
        assert_eq!(sensor.read(), vec![None, None, None]);
        sensor.close();
    }
}
