//! Thrust load cell
//!
//! The amplifier streams `H<raw>\n`. The load cell sits on a lever, so the
//! raw reading is calibrated and then moved from the sensor arm to the thrust
//! line:
//!
//! ```text
//! thrust = (raw - offset) / scale * (senlen / efflen)
//! ```
//!
//! `offset` is normally obtained with [`tare`] before a run.

use super::{decode_line, parse_number, Sensor, SerialLink};
use crate::backend::transport::Connector;
use crate::config::ThrustConfig;
use crate::error::{Result, ResultExt, ThrustRigError};
use crate::types::Reading;
use std::time::Duration;

/// Frame marker byte
pub const THRUST_MARKER: char = 'H';

/// Load cell calibration constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub offset: f64,
    pub scale: f64,
    pub senlen: f64,
    pub efflen: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 1.0,
            senlen: 1.0,
            efflen: 1.0,
        }
    }
}

impl Calibration {
    pub fn from_config(config: &ThrustConfig) -> Self {
        Self {
            offset: config.offset,
            scale: config.scale,
            senlen: config.senlen,
            efflen: config.efflen,
        }
    }

    /// Reject constants that would divide by zero or poison every reading
    pub fn validate(&self) -> Result<()> {
        let all_finite = [self.offset, self.scale, self.senlen, self.efflen]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ThrustRigError::Configuration(
                "thrust calibration contains a non-finite value".to_string(),
            ));
        }
        if self.scale == 0.0 {
            return Err(ThrustRigError::Configuration("thrust scale must not be zero".to_string()));
        }
        if self.efflen == 0.0 {
            return Err(ThrustRigError::Configuration("thrust efflen must not be zero".to_string()));
        }
        Ok(())
    }

    /// Raw counts to thrust at the thrust line
    pub fn apply(&self, raw: f64) -> f64 {
        (raw - self.offset) / self.scale * (self.senlen / self.efflen)
    }
}

/// Parse one wire line into the raw, uncalibrated value
pub fn parse_thrust_frame(line: &[u8]) -> Reading {
    let text = decode_line(line)?;
    parse_number(text.strip_prefix(THRUST_MARKER)?)
}

/// Average up to `attempts` readings taken `spacing` apart
///
/// Missing readings are skipped. Fails with
/// [`SensorUnavailable`](ThrustRigError::SensorUnavailable) if none arrive.
pub fn tare<F>(mut sample: F, attempts: usize, spacing: Duration) -> Result<f64>
where
    F: FnMut() -> Reading,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for attempt in 0..attempts {
        if attempt > 0 && !spacing.is_zero() {
            std::thread::sleep(spacing);
        }
        if let Some(value) = sample() {
            sum += value;
            count += 1;
        }
    }

    if count == 0 {
        return Err(ThrustRigError::SensorUnavailable(format!(
            "no thrust readings in {} attempts",
            attempts
        )));
    }
    let offset = sum / count as f64;
    tracing::info!("Tare offset {:.3} from {}/{} readings", offset, count, attempts);
    Ok(offset)
}

/// Driver for the thrust load cell
pub struct ThrustSensor {
    link: SerialLink,
    calibration: Calibration,
}

impl ThrustSensor {
    pub fn new(port: impl Into<String>, baudrate: u32, timeout: Duration, calibration: Calibration) -> Self {
        Self {
            link: SerialLink::new(port, baudrate, timeout),
            calibration,
        }
    }

    pub fn from_config(config: &ThrustConfig, timeout: Duration) -> Self {
        Self::new(
            config.port.clone(),
            config.baudrate,
            timeout,
            Calibration::from_config(config),
        )
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// One uncalibrated reading, used for taring
    pub fn read_raw(&mut self) -> Reading {
        self.link
            .read_line()
            .and_then(|line| parse_thrust_frame(&line))
    }

    /// Tare against the live load cell, using this sensor's open port
    pub fn tare(&mut self, attempts: usize, spacing: Duration) -> Result<f64> {
        if !self.link.is_open() {
            return Err(ThrustRigError::InvalidState(
                "thrust sensor is not started".to_string(),
            ));
        }
        tare(|| self.read_raw(), attempts, spacing)
    }
}

impl Sensor for ThrustSensor {
    fn name(&self) -> &'static str {
        "thrust"
    }

    fn n_vals(&self) -> usize {
        1
    }

    fn enabled(&self) -> bool {
        self.link.is_open()
    }

    fn start(&mut self, connector: &dyn Connector) -> Result<()> {
        self.calibration.validate()?;
        self.link.open(connector).context("Failed to start thrust sensor")
    }

    fn read(&mut self) -> Vec<Reading> {
        vec![self.read_raw().map(|raw| self.calibration.apply(raw))]
    }

    fn flush(&mut self) {
        self.link.flush();
    }

    fn close(&mut self) {
        self.link.close();
    }
}
