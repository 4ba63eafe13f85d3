//! Simulated device helpers

use std::sync::Arc;
use thrustrig::backend::{SimConnector, SimHandle};
use thrustrig::RigConfig;

/// A load cell that answers every idle read with the same raw value
pub fn add_fixed_load_cell(connector: &SimConnector, port: &str, raw: f64) -> SimHandle {
    let frame = format!("H{}\n", raw).into_bytes();
    connector.add_generated(port, move || {
        let frame = frame.clone();
        Box::new(move || frame.clone())
    })
}

/// A coil temperature probe reporting a constant tick count
pub fn add_fixed_temperature(connector: &SimConnector, port: &str, ticks: i64) -> SimHandle {
    let frame = format!("T{}\n", ticks).into_bytes();
    connector.add_generated(port, move || {
        let frame = frame.clone();
        Box::new(move || frame.clone())
    })
}

/// An actuator board that echoes `set` commands as `PWM:` reports
pub fn add_echoing_actuator(connector: &SimConnector, port: &str) -> SimHandle {
    connector.add_responsive(port, || {
        Box::new(|command: &[u8]| {
            let text = String::from_utf8_lossy(command);
            let mut parts = text.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("set"), Some(value)) => format!("PWM: {}\n", value).into_bytes(),
                _ => Vec::new(),
            }
        })
    })
}

/// The full simulated rig on the ports named by `config`
pub fn simulated_rig(config: &RigConfig) -> Arc<SimConnector> {
    Arc::new(SimConnector::simulated_rig(config))
}
