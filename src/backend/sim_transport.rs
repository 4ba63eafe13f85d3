//! Simulated devices for testing and demo runs
//!
//! A [`SimConnector`] hands out [`SimTransport`]s for registered port names.
//! Each port has a shared [`SimHandle`] through which a test can push inbound
//! bytes, inspect what a driver wrote and check whether the port is still
//! open. Ports can also be given a generator (produces bytes whenever a reader
//! finds the line idle) or a responder (produces bytes in reaction to writes).
//!
//! # Example
//!
//! ```ignore
//! use thrustrig::backend::sim_transport::SimConnector;
//!
//! let connector = SimConnector::new();
//! let temp = connector.add_device("/dev/ttyUSB0");
//! temp.push_line("T30000");
//!
//! let rig = SimConnector::simulated_rig(&RigConfig::default());
//! ```

use super::transport::{Connector, OneShot, Transport};
use crate::config::{RigConfig, RpmConfig};
use crate::error::{Result, ThrustRigError};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Produces inbound bytes when the line is idle
pub type Generator = Box<dyn FnMut() -> Vec<u8> + Send>;

/// Produces inbound bytes in reaction to a write
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

type GeneratorFactory = Arc<dyn Fn() -> Generator + Send + Sync>;
type ResponderFactory = Arc<dyn Fn() -> Responder + Send + Sync>;

/// Time a simulated read blocks when nothing is available
const SIM_IDLE: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct SimWire {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    open: bool,
    opens: usize,
    clears: usize,
}

/// Test-side view of one simulated port
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    wire: Arc<Mutex<SimWire>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimWire> {
        self.wire.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue raw inbound bytes
    pub fn push(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes.iter().copied());
    }

    /// Queue one inbound line, appending `\n`
    pub fn push_line(&self, line: &str) {
        let mut wire = self.lock();
        wire.inbound.extend(line.bytes());
        wire.inbound.push_back(b'\n');
    }

    /// Everything written to the port so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().outbound.clone()
    }

    /// Everything written so far, as text
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.lock().outbound).into_owned()
    }

    /// Inbound bytes not yet consumed
    pub fn pending(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Whether a transport currently holds this port
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// How many times the port has been opened
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    /// How many times the input buffer was discarded
    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }
}

/// In-memory transport backed by a [`SimHandle`]
pub struct SimTransport {
    handle: SimHandle,
    generator: Option<Generator>,
    responder: Option<Responder>,
}

impl SimTransport {
    fn open(handle: SimHandle, generator: Option<Generator>, responder: Option<Responder>) -> Self {
        {
            let mut wire = handle.lock();
            wire.open = true;
            wire.opens += 1;
        }
        Self {
            handle,
            generator,
            responder,
        }
    }
}

impl Transport for SimTransport {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(byte) = self.handle.lock().inbound.pop_front() {
            return Ok(Some(byte));
        }
        if let Some(generator) = self.generator.as_mut() {
            let bytes = generator();
            let mut wire = self.handle.lock();
            wire.inbound.extend(bytes);
            if let Some(byte) = wire.inbound.pop_front() {
                return Ok(Some(byte));
            }
        }
        std::thread::sleep(SIM_IDLE);
        Ok(None)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let reply = self.responder.as_mut().map(|r| r(data));
        let mut wire = self.handle.lock();
        wire.outbound.extend_from_slice(data);
        if let Some(reply) = reply {
            wire.inbound.extend(reply);
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.handle.lock().inbound.len())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut wire = self.handle.lock();
        wire.inbound.clear();
        wire.clears += 1;
        Ok(())
    }

    fn clear_output(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.handle.lock().open = false;
    }
}

struct SimDevice {
    handle: SimHandle,
    generator: Option<GeneratorFactory>,
    responder: Option<ResponderFactory>,
}

/// Scripted RPM tool: pops queued outputs, empty output when exhausted
#[derive(Clone)]
pub struct SimOneShot {
    outputs: Arc<Mutex<VecDeque<String>>>,
    installed: bool,
    latency: Duration,
}

impl OneShot for SimOneShot {
    fn check(&self) -> Result<()> {
        if self.installed {
            Ok(())
        } else {
            Err(ThrustRigError::Configuration(
                "sigrok-cli not found (simulated)".to_string(),
            ))
        }
    }

    fn measure(&mut self) -> io::Result<String> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        Ok(self
            .outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default())
    }
}

/// Connector over simulated ports
pub struct SimConnector {
    devices: Mutex<HashMap<String, SimDevice>>,
    rpm: Mutex<Option<SimOneShot>>,
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SimConnector {
    /// Create a connector with no devices attached
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            rpm: Mutex::new(None),
        }
    }

    fn insert(&self, port: &str, device: SimDevice) -> SimHandle {
        let handle = device.handle.clone();
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port.to_string(), device);
        handle
    }

    /// Attach a passive device; bytes arrive only when pushed through the handle
    pub fn add_device(&self, port: &str) -> SimHandle {
        self.insert(
            port,
            SimDevice {
                handle: SimHandle::default(),
                generator: None,
                responder: None,
            },
        )
    }

    /// Attach a device that produces bytes whenever the line is idle
    pub fn add_generated<F>(&self, port: &str, factory: F) -> SimHandle
    where
        F: Fn() -> Generator + Send + Sync + 'static,
    {
        self.insert(
            port,
            SimDevice {
                handle: SimHandle::default(),
                generator: Some(Arc::new(factory)),
                responder: None,
            },
        )
    }

    /// Attach a device that answers writes
    pub fn add_responsive<F>(&self, port: &str, factory: F) -> SimHandle
    where
        F: Fn() -> Responder + Send + Sync + 'static,
    {
        self.insert(
            port,
            SimDevice {
                handle: SimHandle::default(),
                generator: None,
                responder: Some(Arc::new(factory)),
            },
        )
    }

    /// Install a simulated RPM tool returning the given outputs in order
    pub fn set_rpm_outputs<I, S>(&self, outputs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_rpm_tool(outputs, Duration::ZERO);
    }

    /// Install a simulated RPM tool that takes `latency` per measurement
    pub fn set_rpm_tool<I, S>(&self, outputs: I, latency: Duration)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.rpm.lock().unwrap_or_else(|e| e.into_inner()) = Some(SimOneShot {
            outputs: Arc::new(Mutex::new(outputs.into_iter().map(Into::into).collect())),
            installed: true,
            latency,
        });
    }

    /// Number of simulated ports currently held open
    pub fn open_ports(&self) -> usize {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|d| d.handle.is_open())
            .count()
    }

    /// Handle of a registered port
    pub fn handle(&self, port: &str) -> Option<SimHandle> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(port)
            .map(|d| d.handle.clone())
    }

    /// A whole rig of plausible devices on the ports named by `config`
    pub fn simulated_rig(config: &RigConfig) -> Self {
        let connector = Self::new();
        let started = Instant::now();

        connector.add_generated(&config.temp.port, move || {
            Box::new(move || {
                // ~40 C with a slow drift
                let t = started.elapsed().as_secs_f64();
                let celsius = 40.0 + 5.0 * (t / 30.0).sin();
                format!("T{}\n", (celsius * 60.0 * 1000.0 / 80.0).round() as i64).into_bytes()
            })
        });

        connector.add_generated(&config.batt.port, move || {
            Box::new(move || {
                let t = started.elapsed().as_secs_f64();
                let volts = 12.6 - 0.01 * t;
                let amps = 3.5 + (t / 5.0).sin();
                format!(
                    "\r:r51=1,0,0,\n:r50=1,47,{},{},0,0,0,0,{},\n",
                    (volts * 100.0).round() as i64,
                    (amps * 100.0).round() as i64,
                    125
                )
                .into_bytes()
            })
        });

        let offset = config.thrust.offset;
        let scale = config.thrust.scale;
        connector.add_generated(&config.thrust.port, move || {
            Box::new(move || {
                let t = started.elapsed().as_secs_f64();
                let newtons = 4.0 + 0.5 * (t / 3.0).sin();
                format!("H{:.1}\n", offset + newtons * scale).into_bytes()
            })
        });

        connector.add_responsive(&config.pwm.port, || {
            Box::new(|command: &[u8]| {
                let text = String::from_utf8_lossy(command);
                let mut parts = text.split_whitespace();
                match parts.next() {
                    Some("set") => match parts.next() {
                        Some(v) => format!("PWM: {}\n", v).into_bytes(),
                        None => Vec::new(),
                    },
                    Some("ramp") => match parts.next() {
                        Some(peak) => format!("PWM: {}\nRamp complete\n", peak).into_bytes(),
                        None => Vec::new(),
                    },
                    _ => Vec::new(),
                }
            })
        });

        connector.set_rpm_tool(
            (0..100_000).map(|i| format!("1 {} RPM\n", 3000 + (i % 50) * 10)),
            Duration::from_millis(50),
        );

        connector
    }
}

impl Connector for SimConnector {
    fn open_serial(&self, port: &str, _baudrate: u32, _timeout: Duration) -> Result<Box<dyn Transport>> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let device = devices
            .get(port)
            .ok_or_else(|| ThrustRigError::transport(port, "No such device"))?;
        if device.handle.is_open() {
            return Err(ThrustRigError::transport(port, "Device or resource busy"));
        }
        let generator = device.generator.as_ref().map(|f| f());
        let responder = device.responder.as_ref().map(|f| f());
        Ok(Box::new(SimTransport::open(
            device.handle.clone(),
            generator,
            responder,
        )))
    }

    fn rpm_command(&self, _config: &RpmConfig) -> Box<dyn OneShot> {
        match self.rpm.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(tool) => Box::new(tool.clone()),
            None => Box::new(SimOneShot {
                outputs: Arc::new(Mutex::new(VecDeque::new())),
                installed: false,
                latency: Duration::ZERO,
            }),
        }
    }
}
