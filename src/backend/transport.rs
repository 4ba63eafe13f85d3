//! Serial transport abstraction
//!
//! Drivers never touch the `serialport` crate directly. They talk to a
//! [`Transport`] (byte/line reads, writes, buffer discards) obtained from a
//! [`Connector`], which lets sessions run against real ports
//! ([`SerialConnector`]) or simulated ones
//! ([`SimConnector`](super::sim_transport::SimConnector)).

use crate::config::RpmConfig;
use crate::error::{Result, ThrustRigError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Upper bound on a single line, guards against a device that never sends `\n`
pub const MAX_LINE_LEN: usize = 4096;

/// Byte-level access to one open device
///
/// Reads return `Ok(None)` on timeout; only real I/O faults are errors.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Read one byte, `None` if nothing arrived within the port timeout
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Read up to and including the next `\n`
    ///
    /// Returns whatever arrived before a timeout (possibly a partial line),
    /// or `None` if nothing arrived at all.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        while line.len() < MAX_LINE_LEN {
            match self.read_byte()? {
                Some(b'\n') => {
                    line.push(b'\n');
                    return Ok(Some(line));
                }
                Some(byte) => line.push(byte),
                None => break,
            }
        }
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Write the whole buffer and flush it downstream
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bytes received but not yet read
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Discard received-but-unread bytes
    fn clear_input(&mut self) -> io::Result<()>;

    /// Discard written-but-unsent bytes
    fn clear_output(&mut self) -> io::Result<()>;
}

/// One-shot external measurement (e.g. a sigrok-cli invocation)
pub trait OneShot: Send {
    /// Verify the tool can be run at all
    fn check(&self) -> Result<()>;

    /// Run one measurement and return its standard output
    fn measure(&mut self) -> io::Result<String>;
}

/// Opens devices for drivers
pub trait Connector: Send + Sync {
    /// Open a serial device
    fn open_serial(&self, port: &str, baudrate: u32, timeout: Duration) -> Result<Box<dyn Transport>>;

    /// Build the one-shot RPM measurement command
    fn rpm_command(&self, config: &RpmConfig) -> Box<dyn OneShot> {
        Box::new(SigrokCommand::new(config.path.clone(), config.driver.clone()))
    }
}

// ==================== Serial ====================

/// Serial port wrapper with a small receive buffer for byte-wise reads
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    pending: Vec<u8>,
    cursor: usize,
}

impl SerialTransport {
    /// Open a serial port at 8N1 with no flow control
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baudrate` - Baud rate (e.g., 115200)
    /// * `timeout` - Per-read timeout
    pub fn open(path: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| ThrustRigError::transport(path, e))?;

        tracing::info!("Opened serial port {} at {} baud", path, baudrate);

        Ok(Self {
            port,
            name: path.to_string(),
            pending: Vec::with_capacity(256),
            cursor: 0,
        })
    }

    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; 256];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.pending.clear();
                self.pending.extend_from_slice(&chunk[..n]);
                self.cursor = 0;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Transport for SerialTransport {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.cursor >= self.pending.len() && !self.fill()? {
            return Ok(None);
        }
        let byte = self.pending[self.cursor];
        self.cursor += 1;
        Ok(Some(byte))
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, data)?;
        self.port.flush()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let buffered = self.pending.len() - self.cursor;
        let queued = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        Ok(buffered + queued)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.cursor = 0;
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn clear_output(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Output).map_err(io::Error::from)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        tracing::debug!("Closed serial port {}", self.name);
    }
}

/// Connector for real hardware
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open_serial(&self, port: &str, baudrate: u32, timeout: Duration) -> Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport::open(port, baudrate, timeout)?))
    }
}

// ==================== sigrok ====================

/// Runs `sigrok-cli --driver=<driver> --samples=1`
#[derive(Debug, Clone)]
pub struct SigrokCommand {
    path: PathBuf,
    driver: String,
}

impl SigrokCommand {
    pub fn new(path: PathBuf, driver: String) -> Self {
        Self { path, driver }
    }
}

impl OneShot for SigrokCommand {
    fn check(&self) -> Result<()> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(ThrustRigError::Configuration(format!(
                "sigrok-cli not found at {}",
                self.path.display()
            )))
        }
    }

    fn measure(&mut self) -> io::Result<String> {
        let output = Command::new(&self.path)
            .arg(format!("--driver={}", self.driver))
            .arg("--samples=1")
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
