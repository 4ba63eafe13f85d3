//! Latest-value wrapper for slow sensors
//!
//! A [`DecoupledSensor`] moves its inner driver onto a dedicated thread that
//! reads back to back and keeps only the newest result. The collector's read
//! then never blocks: it takes the newest result if there is one and reports
//! missing values otherwise, so every reading lands in exactly one row.

use super::Sensor;
use crate::backend::transport::Connector;
use crate::error::{Result, ThrustRigError};
use crate::types::Reading;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between two background reads
const IDLE: Duration = Duration::from_millis(5);

type Slot = Arc<Mutex<Option<Vec<Reading>>>>;

struct Poller {
    shutdown: Sender<()>,
    handle: JoinHandle<Box<dyn Sensor>>,
}

/// Polls a sensor on its own thread and serves its latest readings
pub struct DecoupledSensor {
    name: &'static str,
    n_vals: usize,
    inner: Option<Box<dyn Sensor>>,
    latest: Slot,
    poller: Option<Poller>,
}

impl DecoupledSensor {
    pub fn new(inner: Box<dyn Sensor>) -> Self {
        Self {
            name: inner.name(),
            n_vals: inner.n_vals(),
            inner: Some(inner),
            latest: Arc::new(Mutex::new(None)),
            poller: None,
        }
    }
}

fn poll_loop(mut sensor: Box<dyn Sensor>, latest: Slot, shutdown: Receiver<()>) -> Box<dyn Sensor> {
    tracing::debug!("{} poller started", sensor.name());
    loop {
        let readings = sensor.read();
        sensor.flush();
        // An all-missing read must not overwrite a value nobody has taken yet
        if readings.iter().any(Option::is_some) {
            *latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(readings);
        }

        match shutdown.recv_timeout(IDLE) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }
    tracing::debug!("{} poller stopped", sensor.name());
    sensor
}

impl Sensor for DecoupledSensor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn n_vals(&self) -> usize {
        self.n_vals
    }

    fn enabled(&self) -> bool {
        self.poller.is_some()
    }

    fn start(&mut self, connector: &dyn Connector) -> Result<()> {
        if self.poller.is_some() {
            return Ok(());
        }
        let mut sensor = self
            .inner
            .take()
            .ok_or_else(|| ThrustRigError::InvalidState(format!("{} poller lost its sensor", self.name)))?;
        if let Err(e) = sensor.start(connector) {
            self.inner = Some(sensor);
            return Err(e);
        }

        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let (shutdown, rx) = bounded(1);
        let latest = self.latest.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-poller", self.name))
            .spawn(move || poll_loop(sensor, latest, rx));

        match spawned {
            Ok(handle) => {
                self.poller = Some(Poller { shutdown, handle });
                Ok(())
            }
            Err(e) => Err(ThrustRigError::Io(e)),
        }
    }

    fn read(&mut self) -> Vec<Reading> {
        if self.poller.is_none() {
            return self.missing();
        }
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| self.missing())
    }

    fn flush(&mut self) {}

    fn close(&mut self) {
        if let Some(poller) = self.poller.take() {
            let _ = poller.shutdown.send(());
            match poller.handle.join() {
                Ok(mut sensor) => {
                    sensor.close();
                    self.inner = Some(sensor);
                }
                Err(_) => tracing::error!("{} poller panicked", self.name),
            }
        } else if let Some(sensor) = self.inner.as_mut() {
            sensor.close();
        }
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Drop for DecoupledSensor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sensors::RpmSensor;
    use crate::backend::sim_transport::SimConnector;
    use crate::config::RpmConfig;
    use std::time::Instant;

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_serves_latest_value_once() {
        let connector = SimConnector::new();
        connector.set_rpm_outputs(["1 3000 RPM\n"]);
        let mut sensor = DecoupledSensor::new(Box::new(RpmSensor::new(RpmConfig::default())));
        assert_eq!(sensor.name(), "rpm");
        assert_eq!(sensor.n_vals(), 1);

        sensor.start(&connector).unwrap();
        assert!(sensor.enabled());

        // Only the first measurement yields a value; the empty outputs after it
        // must not replace it before it is taken
        let mut seen = Vec::new();
        assert!(wait_for(|| {
            let r = sensor.read();
            if r[0].is_some() {
                seen.push(r[0]);
            }
            !seen.is_empty()
        }));
        assert_eq!(seen, vec![Some(3000.0)]);

        sensor.close();
        assert!(!sensor.enabled());
        assert_eq!(sensor.read(), vec![None]);
    }

    #[test]
    fn test_start_failure_keeps_sensor_for_retry() {
        let connector = SimConnector::new();
        let mut sensor = DecoupledSensor::new(Box::new(RpmSensor::new(RpmConfig::default())));
        assert!(sensor.start(&connector).is_err());
        assert!(!sensor.enabled());

        connector.set_rpm_outputs(["1 10 RPM\n"]);
        sensor.start(&connector).unwrap();
        assert!(sensor.enabled());
        sensor.close();
        sensor.close();
    }
}
