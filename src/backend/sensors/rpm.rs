//! Tachometer read through sigrok-cli
//!
//! Each read runs the tool once and takes the second space-separated token of
//! its output as the RPM value. A run takes a noticeable fraction of a second,
//! which is why the session can wrap this driver in a
//! [`DecoupledSensor`](super::DecoupledSensor).

use super::{parse_number, Sensor};
use crate::backend::transport::{Connector, OneShot};
use crate::config::RpmConfig;
use crate::error::{Result, ResultExt};
use crate::types::Reading;
use std::time::Instant;

/// Parse one tool output, e.g. `"1 3120 RPM\n"`
pub fn parse_rpm_output(output: &str) -> Reading {
    parse_number(output.split(' ').nth(1)?)
}

/// Driver for the sigrok tachometer
pub struct RpmSensor {
    config: RpmConfig,
    tool: Option<Box<dyn OneShot>>,
}

impl RpmSensor {
    pub fn new(config: RpmConfig) -> Self {
        Self { config, tool: None }
    }
}

impl Sensor for RpmSensor {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn n_vals(&self) -> usize {
        1
    }

    fn enabled(&self) -> bool {
        self.tool.is_some()
    }

    fn start(&mut self, connector: &dyn Connector) -> Result<()> {
        let tool = connector.rpm_command(&self.config);
        tool.check().context("Failed to start RPM probe")?;
        tracing::info!("RPM probe using {}", self.config.path.display());
        self.tool = Some(tool);
        Ok(())
    }

    fn read(&mut self) -> Vec<Reading> {
        let Some(tool) = self.tool.as_mut() else {
            return self.missing();
        };
        let started = Instant::now();
        let reading = match tool.measure() {
            Ok(output) => parse_rpm_output(&output),
            Err(e) => {
                tracing::debug!("RPM measurement failed: {}", e);
                None
            }
        };
        tracing::trace!("RPM measurement took {:?}", started.elapsed());
        vec![reading]
    }

    fn flush(&mut self) {}

    fn close(&mut self) {
        self.tool = None;
    }
}
