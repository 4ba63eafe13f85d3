//! Sensor drivers
//!
//! Every instrument on the rig implements [`Sensor`]: it is started once per
//! session, read once per collector tick, flushed after every appended row
//! and closed on stop. A read never fails; anything unusable on the wire
//! comes back as missing values, so the collector can keep going through
//! garbled frames, unplugged cables and slow devices alike.
//!
//! # Drivers
//!
//! | Driver | Columns | Wire |
//! |---|---|---|
//! | [`TemperatureSensor`] | coil temperature | `T<int>\n` |
//! | [`VoltAmpSensor`] | voltage, current, battery temperature | `:r50` framed, comma separated |
//! | [`ThrustSensor`] | thrust | `H<number>\n` |
//! | [`RpmSensor`] | rpm | one sigrok-cli run per read |
//!
//! [`DecoupledSensor`] wraps any driver and polls it on its own thread.

pub mod latest;
pub mod rpm;
pub mod temperature;
pub mod thrust;
pub mod voltamp;

pub use latest::DecoupledSensor;
pub use rpm::RpmSensor;
pub use temperature::TemperatureSensor;
pub use thrust::{Calibration, ThrustSensor};
pub use voltamp::VoltAmpSensor;

use super::transport::{Connector, Transport};
use crate::error::Result;
use crate::types::Reading;
use std::time::Duration;

/// Common contract for everything the collector polls
pub trait Sensor: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Number of columns this sensor fills
    fn n_vals(&self) -> usize;

    /// Whether the sensor has been started and holds its device
    fn enabled(&self) -> bool;

    /// Open the device; transport or configuration errors abort the session start
    fn start(&mut self, connector: &dyn Connector) -> Result<()>;

    /// One polling cycle's readings, `n_vals()` long; missing values on any failure
    fn read(&mut self) -> Vec<Reading>;

    /// Discard buffered-but-unread bytes
    fn flush(&mut self);

    /// Release the device; safe on a never-started or already-closed sensor
    fn close(&mut self);

    /// Readings for a tick where this sensor contributes nothing
    fn missing(&self) -> Vec<Reading> {
        vec![None; self.n_vals()]
    }
}

/// Decode one wire line: UTF-8, surrounding whitespace stripped, empty lines rejected
pub fn decode_line(line: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parse a decimal number, rejecting NaN and infinities
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A serial device held by a driver
///
/// Owns at most one transport; `close` drops it, which releases the port.
pub struct SerialLink {
    port: String,
    baudrate: u32,
    timeout: Duration,
    transport: Option<Box<dyn Transport>>,
}

impl SerialLink {
    pub fn new(port: impl Into<String>, baudrate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baudrate,
            timeout,
            transport: None,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the port and discard anything already queued in either direction
    pub fn open(&mut self, connector: &dyn Connector) -> Result<()> {
        if self.transport.is_some() {
            tracing::debug!("{} already open", self.port);
            return Ok(());
        }
        let mut transport = connector.open_serial(&self.port, self.baudrate, self.timeout)?;
        if let Err(e) = transport.clear_input().and_then(|_| transport.clear_output()) {
            tracing::debug!("Initial flush of {} failed: {}", self.port, e);
        }
        self.transport = Some(transport);
        Ok(())
    }

    /// Access the open transport
    pub fn transport(&mut self) -> Option<&mut (dyn Transport + 'static)> {
        self.transport.as_deref_mut()
    }

    /// Read one line, `None` if closed, timed out or faulted
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        let transport = self.transport.as_mut()?;
        match transport.read_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", self.port, e);
                None
            }
        }
    }

    /// Discard pending input and output
    pub fn flush(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.clear_input().and_then(|_| transport.clear_output()) {
                tracing::debug!("Flush of {} failed: {}", self.port, e);
            }
        }
    }

    /// Drop the transport; returns whether it was open
    pub fn close(&mut self) -> bool {
        let was_open = self.transport.take().is_some();
        if was_open {
            tracing::debug!("Released {}", self.port);
        }
        was_open
    }
}
