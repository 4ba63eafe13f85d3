//! Sample collector thread
//!
//! The collector owns the started sensors for the lifetime of a session and
//! runs on its own thread. Each tick it reads every sensor in column order,
//! adds the actuator's last-known pulse, and appends the row to the shared
//! [`SampleBuffer`].
//!
//! # Pacing
//!
//! Ticks are spaced by at least the configured poll interval, measured on the
//! monotonic clock from the start of the previous tick. The wait doubles as
//! the shutdown check: a stop request ends the wait immediately, so a stop
//! takes effect within one in-flight tick.
//!
//! # Row Assembly
//!
//! - Disabled sensors contribute missing values for all their columns
//! - A row whose width does not match the schema is dropped and counted
//! - After a successful append every sensor is flushed, so the next tick
//!   reads fresh frames instead of a backlog

use crate::backend::actuator::PwmState;
use crate::backend::sensors::Sensor;
use crate::error::{Result, ThrustRigError};
use crate::session::SampleBuffer;
use crate::types::{CollectionCounters, Reading, SampleRow, SCHEMA_WIDTH};
use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What one tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Row appended, with the number of rows archived as a side effect
    Appended { archived: usize },
    /// Row width did not match the schema
    Dropped,
    /// Row kept in memory but the archive write failed
    ArchiveFailed,
}

/// The collection loop and everything it needs
pub struct Collector {
    sensors: Vec<Box<dyn Sensor>>,
    pwm: Option<Arc<PwmState>>,
    buffer: Arc<SampleBuffer>,
    counters: Arc<CollectionCounters>,
    interval: Duration,
    last_timestamp: Option<DateTime<Local>>,
}

impl Collector {
    /// `pwm` is the started actuator's state, `None` when no actuator is attached
    pub fn new(
        sensors: Vec<Box<dyn Sensor>>,
        pwm: Option<Arc<PwmState>>,
        buffer: Arc<SampleBuffer>,
        counters: Arc<CollectionCounters>,
        interval: Duration,
    ) -> Self {
        Self {
            sensors,
            pwm,
            buffer,
            counters,
            interval,
            last_timestamp: None,
        }
    }

    /// Wall-clock timestamp, never earlier than the previous row's
    fn next_timestamp(&mut self) -> DateTime<Local> {
        let now = Local::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now < last => {
                tracing::debug!("Wall clock stepped back, holding timestamp at {}", last);
                last
            }
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    fn assemble(&mut self) -> Vec<Reading> {
        let mut values = Vec::with_capacity(SCHEMA_WIDTH);
        for sensor in self.sensors.iter_mut() {
            if sensor.enabled() {
                values.extend(sensor.read());
            } else {
                values.extend(sensor.missing());
            }
        }
        values.push(
            self.pwm
                .as_ref()
                .and_then(|state| state.last_value())
                .map(f64::from),
        );
        values
    }

    /// Run one polling cycle
    pub fn tick(&mut self) -> TickOutcome {
        let timestamp = self.next_timestamp();
        let values = self.assemble();

        let Some(row) = SampleRow::from_readings(timestamp, &values) else {
            self.counters.record_dropped();
            tracing::warn!(
                "Dropping row with {} values, expected {}",
                values.len(),
                SCHEMA_WIDTH
            );
            return TickOutcome::Dropped;
        };

        let outcome = match self.buffer.append(row) {
            Ok(archived) => {
                self.counters.record_appended();
                if archived > 0 {
                    self.counters.record_archived(archived);
                }
                TickOutcome::Appended { archived }
            }
            Err(e) => {
                self.counters.record_appended();
                self.counters.record_archive_failure();
                tracing::error!("Archiving failed: {}", e);
                TickOutcome::ArchiveFailed
            }
        };

        for sensor in self.sensors.iter_mut() {
            sensor.flush();
        }
        outcome
    }

    /// Run ticks until `shutdown` fires or its sender is dropped
    ///
    /// Returns the sensors so the caller can close them.
    pub fn run(mut self, shutdown: Receiver<()>) -> Vec<Box<dyn Sensor>> {
        tracing::info!(
            "Collector started: {} sensors, interval {:?}",
            self.sensors.len(),
            self.interval
        );
        self.counters.set_running(true);

        let mut next_tick = Instant::now();
        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match shutdown.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }

            let started = Instant::now();
            next_tick = started + self.interval;
            self.tick();
            self.counters
                .record_tick(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));
        }

        self.counters.set_running(false);
        tracing::info!("Collector stopped");
        self.sensors
    }

    /// Move the collector onto its own thread
    pub fn spawn(self) -> Result<CollectorHandle> {
        let (shutdown, rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("collector".to_string())
            .spawn(move || self.run(rx))
            .map_err(|e| ThrustRigError::Io(e).with_context("Failed to spawn collector"))?;
        Ok(CollectorHandle { shutdown, handle })
    }
}

/// Running collector thread
pub struct CollectorHandle {
    shutdown: Sender<()>,
    handle: JoinHandle<Vec<Box<dyn Sensor>>>,
}

impl CollectorHandle {
    /// Signal the loop, wait for it and take back the sensors
    ///
    /// If the collector thread panicked the sensors are lost; their transports
    /// were dropped during unwinding.
    pub fn stop(self) -> Vec<Box<dyn Sensor>> {
        let _ = self.shutdown.send(());
        match self.handle.join() {
            Ok(sensors) => sensors,
            Err(_) => {
                tracing::error!("Collector thread panicked");
                Vec::new()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
