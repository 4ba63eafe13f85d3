//! Backend module for device I/O
//!
//! Everything that touches hardware lives here and runs off the caller's
//! thread: the collector loop, the actuator's reader, and (optionally) a
//! poller for slow sensors.
//!
//! # Architecture
//!
//! ```text
//! Connector ──opens──► Transport ──owned by──► Sensor drivers ──► Collector thread ──► SampleBuffer
//!                                  └────────► PwmDriver ──► reader thread ──► PwmState ──┘
//! ```
//!
//! # Components
//!
//! - [`Transport`] / [`Connector`] - byte-level device access, real or simulated
//! - [`Sensor`] - common driver contract, with [`TemperatureSensor`],
//!   [`VoltAmpSensor`], [`ThrustSensor`] and [`RpmSensor`]
//! - [`PwmDriver`] - actuator commands and report tracking
//! - [`Collector`] - the paced sampling loop

pub mod actuator;
pub mod sensors;
pub mod sim_transport;
pub mod transport;
pub mod worker;

pub use actuator::{ActuatorReport, PwmDriver, PwmState, PULSE_MAX, PULSE_MIN};
pub use sensors::{
    Calibration, DecoupledSensor, RpmSensor, Sensor, TemperatureSensor, ThrustSensor, VoltAmpSensor,
};
pub use sim_transport::{SimConnector, SimHandle};
pub use transport::{Connector, OneShot, SerialConnector, SigrokCommand, Transport};
pub use worker::{Collector, CollectorHandle, TickOutcome};

use crate::config::RigConfig;

/// Build the rig's sensors in column order from configuration
///
/// Disabled devices are still present so the row keeps its width; they are
/// simply never started.
pub fn build_sensors(config: &RigConfig) -> Vec<Box<dyn Sensor>> {
    let read_timeout = config.collection.read_timeout();
    let rpm: Box<dyn Sensor> = if config.rpm.decouple {
        Box::new(DecoupledSensor::new(Box::new(RpmSensor::new(config.rpm.clone()))))
    } else {
        Box::new(RpmSensor::new(config.rpm.clone()))
    };
    vec![
        Box::new(TemperatureSensor::from_config(&config.temp, read_timeout)),
        Box::new(VoltAmpSensor::from_config(&config.batt)),
        Box::new(ThrustSensor::from_config(&config.thrust, read_timeout)),
        rpm,
    ]
}

/// Which entries of [`build_sensors`] are enabled, in the same order
pub fn sensor_enables(config: &RigConfig) -> [bool; 4] {
    [
        config.temp.enable,
        config.batt.enable,
        config.thrust.enable,
        config.rpm.enable,
    ]
}
