//! Measurement sessions
//!
//! A [`Session`] owns everything one run of the rig needs: the sensor
//! drivers (while running), the actuator, the bounded sample buffer and its
//! overflow store, and the collector thread.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start──► Running ──stop──► Stopped
//!    │                  │
//!    ├─ reset           ├─ window / export / stats
//!    ├─ update_config   ├─ set_pwm / start_ramp / stop_ramp
//!    └─ tare_thrust     └─ (tare refused if the load cell is in use)
//! ```
//!
//! Starting is all-or-nothing: if any enabled device fails to open, every
//! device opened by that attempt is closed again before the error is
//! returned. Stopping parks the actuator at a safe pulse before releasing it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use thrustrig::{RigConfig, SerialConnector, Session};
//!
//! let config = RigConfig::load_or_default("rig.json");
//! let mut session = Session::new(config, Arc::new(SerialConnector))?;
//! session.start()?;
//! session.set_pwm(1200);
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! session.stop()?;
//! std::fs::write("run.csv", session.export()?)?;
//! ```

pub mod buffer;
pub mod overflow;
pub mod types;

pub use buffer::SampleBuffer;
pub use overflow::OverflowStore;
pub use types::{SessionState, SessionStatus};

use crate::backend::{
    build_sensors, sensor_enables, Collector, CollectorHandle, Connector, PwmDriver, Sensor, ThrustSensor,
};
use crate::config::RigConfig;
use crate::error::{Result, ResultExt, ThrustRigError};
use crate::types::{CollectionCounters, CollectionStats, SampleRow};
use std::path::Path;
use std::sync::Arc;

/// One rig, its buffer and its background tasks
pub struct Session {
    config: RigConfig,
    connector: Arc<dyn Connector>,
    buffer: Arc<SampleBuffer>,
    counters: Arc<CollectionCounters>,
    pwm: PwmDriver,
    collector: Option<CollectorHandle>,
}

impl Session {
    /// Create a stopped session with an empty buffer and a fresh overflow store
    pub fn new(config: RigConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let buffer = Arc::new(SampleBuffer::from_settings(&config.collection)?);
        let pwm = Self::build_pwm(&config);
        Ok(Self {
            config,
            connector,
            buffer,
            counters: Arc::new(CollectionCounters::new()),
            pwm,
            collector: None,
        })
    }

    fn build_pwm(config: &RigConfig) -> PwmDriver {
        PwmDriver::from_config(
            &config.pwm,
            config.collection.read_timeout(),
            config.collection.pwm_poll(),
        )
    }

    pub fn state(&self) -> SessionState {
        if self.collector.is_some() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// Replace the configuration
    ///
    /// Only allowed while stopped. Buffer bounds and the overflow location
    /// take effect at the next [`reset`](Self::reset).
    pub fn update_config(&mut self, config: RigConfig) -> Result<()> {
        if self.is_running() {
            return Err(ThrustRigError::InvalidState(
                "configuration cannot change while a session is running".to_string(),
            ));
        }
        config.collection.validate()?;
        if config.pwm != self.config.pwm || config.collection != self.config.collection {
            self.pwm = Self::build_pwm(&config);
        }
        self.config = config;
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Open every enabled device and launch the collector
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ThrustRigError::InvalidState("session is already running".to_string()));
        }
        self.config.collection.validate()?;

        let connector = self.connector.as_ref();
        let mut sensors = build_sensors(&self.config);
        let enables = sensor_enables(&self.config);

        let opened = sensors
            .iter_mut()
            .zip(enables)
            .filter(|(_, enabled)| *enabled)
            .try_for_each(|(sensor, _)| {
                tracing::debug!("Starting {}", sensor.name());
                sensor.start(connector)
            })
            .and_then(|_| {
                if self.config.pwm.enable {
                    self.pwm.start(connector)
                } else {
                    Ok(())
                }
            });

        if let Err(e) = opened {
            tracing::error!("Session start aborted: {}", e);
            for sensor in sensors.iter_mut() {
                sensor.close();
            }
            self.pwm.close();
            return Err(e);
        }

        let collector = Collector::new(
            sensors,
            self.pwm.enabled().then(|| self.pwm.state()),
            self.buffer.clone(),
            self.counters.clone(),
            self.config.collection.poll_interval(),
        );
        match collector.spawn() {
            Ok(handle) => self.collector = Some(handle),
            Err(e) => {
                self.pwm.close();
                return Err(e);
            }
        }

        tracing::info!("Session started");
        Ok(())
    }

    /// Stop the collector, release every device and park the actuator
    ///
    /// Does nothing when already stopped.
    pub fn stop(&mut self) -> Result<()> {
        let Some(collector) = self.collector.take() else {
            return Ok(());
        };

        for mut sensor in collector.stop() {
            sensor.close();
        }

        if self.pwm.enabled() {
            let settings = &self.config.collection;
            self.pwm.stop_ramp();
            if !self.pwm.set(settings.park_pulse) {
                tracing::warn!("Could not park actuator at {}", settings.park_pulse);
            }
            std::thread::sleep(settings.park_settle());
            self.pwm.close();
        }

        tracing::info!("Session stopped: {}", self.counters.snapshot());
        Ok(())
    }

    /// Clear the buffer and start a fresh overflow store
    pub fn reset(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ThrustRigError::InvalidState("stop the session before resetting".to_string()));
        }

        let settings = &self.config.collection;
        let path = settings.resolved_overflow_path()?;
        let bounds_changed = settings.buffer_capacity != self.buffer.capacity()
            || settings.archive_block != self.buffer.block()
            || path != self.buffer.overflow_path();

        if bounds_changed {
            self.buffer = Arc::new(SampleBuffer::from_settings(settings)?);
        } else {
            self.buffer.reset()?;
        }
        self.counters.clear();
        tracing::info!("Session data reset");
        Ok(())
    }

    // ==================== Data ====================

    /// In-memory rows, oldest first
    pub fn window(&self) -> Vec<SampleRow> {
        self.buffer.window()
    }

    /// The whole session (archived and in-memory rows) as delimited text
    pub fn export(&self) -> Result<Vec<u8>> {
        self.buffer.export()
    }

    /// Export to a file
    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = self.export()?;
        std::fs::write(path, data).context(format!("Failed to write export to {:?}", path))?;
        tracing::info!("Exported session to {:?}", path);
        Ok(())
    }

    pub fn stats(&self) -> CollectionStats {
        self.counters.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            buffered_rows: self.buffer.len(),
            pwm: self.pwm.last_value(),
            ramp_active: self.pwm.ramp_active(),
            stats: self.stats(),
        }
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    // ==================== Actuator ====================

    /// Hold a pulse width; `false` while ramping or out of range
    pub fn set_pwm(&self, pulse: u32) -> bool {
        self.pwm.set(pulse)
    }

    /// Start a board-side ramp; `false` if refused
    pub fn start_ramp(&self, peak: u32, step: i32, period: f64) -> bool {
        self.pwm.ramp(peak, step, period)
    }

    /// Abort the running ramp; `false` if none was running
    pub fn stop_ramp(&self) -> bool {
        self.pwm.stop_ramp()
    }

    pub fn pwm_value(&self) -> Option<u32> {
        self.pwm.last_value()
    }

    pub fn ramp_active(&self) -> bool {
        self.pwm.ramp_active()
    }

    // ==================== Calibration ====================

    /// Re-zero the load cell and store the new offset in the configuration
    ///
    /// Opens its own connection to the load cell, so it is refused while a
    /// running session holds that port. On failure the previous offset is kept.
    pub fn tare_thrust(&mut self) -> Result<f64> {
        if self.is_running() && self.config.thrust.enable {
            return Err(ThrustRigError::InvalidState(
                "the thrust sensor is in use by the running session".to_string(),
            ));
        }

        let settings = &self.config.collection;
        let mut sensor = ThrustSensor::from_config(&self.config.thrust, settings.read_timeout());
        sensor.start(self.connector.as_ref())?;
        let result = sensor.tare(settings.tare_samples, settings.tare_spacing());
        sensor.close();

        let offset = result?;
        self.config.thrust.offset = offset;
        Ok(offset)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Failed to stop session on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimConnector;

    fn config(dir: &tempfile::TempDir) -> RigConfig {
        let mut config = RigConfig::default();
        config.collection.overflow_path = Some(dir.path().join("overflow.csv"));
        config.collection.poll_interval_ms = 10;
        config.collection.park_settle_ms = 0;
        config.collection.tare_spacing_ms = 0;
        config
    }

    #[test]
    fn test_new_session_is_stopped_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(config(&dir), Arc::new(SimConnector::new())).unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.window().is_empty());
        assert_eq!(session.pwm_value(), None);
    }

    #[test]
    fn test_invalid_bounds_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.collection.archive_block = 0;
        assert!(Session::new(config, Arc::new(SimConnector::new())).is_err());
    }

    #[test]
    fn test_update_config_refused_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(config(&dir), Arc::new(SimConnector::new())).unwrap();
        session.start().unwrap();

        let err = session.update_config(config(&dir)).unwrap_err();
        assert!(matches!(err, ThrustRigError::InvalidState(_)));
        assert!(session.reset().is_err());

        session.stop().unwrap();
        session.update_config(config(&dir)).unwrap();
        session.reset().unwrap();
    }

    #[test]
    fn test_start_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(config(&dir), Arc::new(SimConnector::new())).unwrap();
        session.start().unwrap();
        assert!(session.start().is_err());
        session.stop().unwrap();
        session.stop().unwrap();
    }

    #[test]
    fn test_failed_tare_keeps_previous_offset() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(SimConnector::new());
        let handle = connector.add_device("/dev/ttyUSB2");
        let mut config = config(&dir);
        config.thrust.offset = 7.0;
        config.collection.tare_samples = 4;
        let mut session = Session::new(config, connector.clone()).unwrap();

        let err = session.tare_thrust().unwrap_err();
        assert!(matches!(err, ThrustRigError::SensorUnavailable(_)));
        assert_eq!(session.config().thrust.offset, 7.0);
        assert!(!handle.is_open());
    }

    #[test]
    fn test_tare_stores_new_offset() {
        let dir = tempfile::tempdir().unwrap();
        // The open-time flush discards anything queued in advance, so the
        // load cell is fed from a generator
        let connector = Arc::new(SimConnector::new());
        connector.add_generated("/dev/ttyUSB2", || Box::new(|| b"H100\n".to_vec()));
        let mut config = config(&dir);
        config.collection.tare_samples = 4;
        let mut session = Session::new(config, connector.clone()).unwrap();

        assert_eq!(session.tare_thrust().unwrap(), 100.0);
        assert_eq!(session.config().thrust.offset, 100.0);
        assert_eq!(connector.open_ports(), 0);
    }
}
