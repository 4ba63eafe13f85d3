//! PWM actuator board
//!
//! The board takes text commands and reports back asynchronously:
//!
//! | Direction | Line | Meaning |
//! |---|---|---|
//! | out | `set <pulse>` | hold a pulse width (1000..=2000 us) |
//! | out | `ramp <peak> <step> <period>` | step toward `peak` on the board |
//! | out | `stop ` | abort a running ramp |
//! | in | `PWM: <pulse>` | current pulse width |
//! | in | `Ramp complete` | ramp finished |
//!
//! A background reader thread applies the reports to shared [`PwmState`],
//! which the collector samples once per tick.
//!
//! ```text
//! Closed ──start──► Idle ──ramp──► Ramping ──"Ramp complete" / stop_ramp──► Idle ──close──► Closed
//! ```

use super::sensors::decode_line;
use super::transport::{Connector, Transport, MAX_LINE_LEN};
use crate::config::SerialDeviceConfig;
use crate::error::{Result, ResultExt, ThrustRigError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Lowest accepted pulse width
pub const PULSE_MIN: u32 = 1000;

/// Highest accepted pulse width
pub const PULSE_MAX: u32 = 2000;

/// Whether a pulse width is within the board's range
pub fn pulse_in_range(pulse: u32) -> bool {
    (PULSE_MIN..=PULSE_MAX).contains(&pulse)
}

/// An inbound report from the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorReport {
    /// Current pulse width
    Pulse(u32),
    /// A ramp finished
    RampComplete,
}

/// Parse one inbound line
pub fn parse_report(line: &[u8]) -> Option<ActuatorReport> {
    let text = decode_line(line)?;
    if text == "Ramp complete" {
        return Some(ActuatorReport::RampComplete);
    }
    text.strip_prefix("PWM: ")
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(ActuatorReport::Pulse)
}

/// State shared between the driver, its reader thread and the collector
#[derive(Debug, Default)]
pub struct PwmState {
    /// Last-known pulse, 0 while unknown
    value: AtomicU32,
    ramp_active: AtomicBool,
}

impl PwmState {
    /// Last-known pulse width, `None` until the first set or report
    pub fn last_value(&self) -> Option<u32> {
        match self.value.load(Ordering::SeqCst) {
            0 => None,
            v => Some(v),
        }
    }

    pub fn ramp_active(&self) -> bool {
        self.ramp_active.load(Ordering::SeqCst)
    }

    fn apply(&self, report: ActuatorReport) {
        match report {
            ActuatorReport::Pulse(v) => self.value.store(v, Ordering::SeqCst),
            ActuatorReport::RampComplete => {
                tracing::info!("Ramp complete");
                self.ramp_active.store(false, Ordering::SeqCst);
            }
        }
    }
}

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

fn lock_transport(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn Transport>> {
    transport.lock().unwrap_or_else(|e| e.into_inner())
}

struct Reader {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Move bytes that have already arrived into `pending` without waiting on the port
fn take_available(transport: &mut dyn Transport, pending: &mut Vec<u8>) -> std::io::Result<()> {
    let available = transport.bytes_to_read()?;
    for _ in 0..available {
        match transport.read_byte()? {
            Some(byte) => pending.push(byte),
            None => break,
        }
    }
    Ok(())
}

/// Apply every complete line in `pending`, keeping a trailing partial line
fn apply_lines(pending: &mut Vec<u8>, state: &PwmState) {
    while let Some(end) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=end).collect();
        match parse_report(&line) {
            Some(report) => state.apply(report),
            None => tracing::trace!("Ignoring PWM line {:?}", String::from_utf8_lossy(&line)),
        }
    }
    if pending.len() > MAX_LINE_LEN {
        tracing::debug!("Discarding {} bytes of unterminated PWM input", pending.len());
        pending.clear();
    }
}

fn reader_loop(transport: SharedTransport, state: Arc<PwmState>, shutdown: Receiver<()>, poll: Duration) {
    tracing::debug!("PWM reader started");
    let mut pending = Vec::new();
    loop {
        match shutdown.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }

        // The lock is held only while copying bytes already received, so
        // commands never queue behind a half-sent report
        let taken = take_available(lock_transport(&transport).as_mut(), &mut pending);
        if let Err(e) = taken {
            tracing::debug!("PWM read failed: {}", e);
        }
        apply_lines(&mut pending, &state);
    }
    tracing::debug!("PWM reader stopped");
}

/// Driver for the PWM actuator board
pub struct PwmDriver {
    port: String,
    baudrate: u32,
    timeout: Duration,
    poll: Duration,
    state: Arc<PwmState>,
    transport: Option<SharedTransport>,
    reader: Option<Reader>,
}

impl PwmDriver {
    pub fn new(port: impl Into<String>, baudrate: u32, timeout: Duration, poll: Duration) -> Self {
        Self {
            port: port.into(),
            baudrate,
            timeout,
            poll,
            state: Arc::new(PwmState::default()),
            transport: None,
            reader: None,
        }
    }

    pub fn from_config(config: &SerialDeviceConfig, timeout: Duration, poll: Duration) -> Self {
        Self::new(config.port.clone(), config.baudrate, timeout, poll)
    }

    /// Shared state, for the collector
    pub fn state(&self) -> Arc<PwmState> {
        self.state.clone()
    }

    pub fn last_value(&self) -> Option<u32> {
        self.state.last_value()
    }

    pub fn ramp_active(&self) -> bool {
        self.state.ramp_active()
    }

    /// Whether the board is connected
    pub fn enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the port and launch the reader thread
    pub fn start(&mut self, connector: &dyn Connector) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        let mut transport = connector
            .open_serial(&self.port, self.baudrate, self.timeout)
            .context("Failed to start PWM actuator")?;
        if let Err(e) = transport.clear_input().and_then(|_| transport.clear_output()) {
            tracing::debug!("Initial flush of {} failed: {}", self.port, e);
        }

        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        let (shutdown, rx) = bounded(1);
        let reader_transport = transport.clone();
        let state = self.state.clone();
        let poll = self.poll;
        let handle = std::thread::Builder::new()
            .name("pwm-reader".to_string())
            .spawn(move || reader_loop(reader_transport, state, rx, poll))
            .map_err(ThrustRigError::Io)?;

        self.transport = Some(transport);
        self.reader = Some(Reader { shutdown, handle });
        tracing::info!("PWM actuator started on {}", self.port);
        Ok(())
    }

    fn send(&self, command: &str) {
        if let Some(transport) = self.transport.as_ref() {
            if let Err(e) = lock_transport(transport).write_all(command.as_bytes()) {
                tracing::warn!("Failed to send {:?} to {}: {}", command.trim_end(), self.port, e);
            }
        }
    }

    /// Hold a pulse width
    ///
    /// Refused while a ramp runs or outside 1000..=2000. The value is recorded
    /// even when the board is not connected.
    pub fn set(&self, pulse: u32) -> bool {
        if self.state.ramp_active() || !pulse_in_range(pulse) {
            return false;
        }
        self.state.value.store(pulse, Ordering::SeqCst);
        self.send(&format!("set {}\n", pulse));
        true
    }

    /// Start a board-side ramp toward `peak`
    pub fn ramp(&self, peak: u32, step: i32, period: f64) -> bool {
        if !pulse_in_range(peak) || step < 0 || period < 0.0 || !period.is_finite() {
            return false;
        }
        // Check and claim in one step so concurrent callers cannot both start a ramp
        if self
            .state
            .ramp_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.send(&format!("ramp {} {} {}\n", peak, step, period));
        tracing::info!("Ramp to {} ({} steps, period {})", peak, step, period);
        true
    }

    /// Abort a running ramp; `false` if none was running
    pub fn stop_ramp(&self) -> bool {
        if !self.state.ramp_active.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.send("stop \n");
        true
    }

    /// Discard pending input and output
    pub fn flush(&self) {
        if let Some(transport) = self.transport.as_ref() {
            let mut transport = lock_transport(transport);
            if let Err(e) = transport.clear_input().and_then(|_| transport.clear_output()) {
                tracing::debug!("Flush of {} failed: {}", self.port, e);
            }
        }
    }

    /// Stop and join the reader, then release the port
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.shutdown.send(());
            if reader.handle.join().is_err() {
                tracing::error!("PWM reader thread panicked");
            }
        }
        if self.transport.take().is_some() {
            tracing::info!("PWM actuator on {} closed", self.port);
        }
    }
}

impl Drop for PwmDriver {
    fn drop(&mut self) {
        self.close();
    }
}
