//! Acquisition settings
//!
//! These control the collector's cadence, the sample buffer's bounds and the
//! actuator/tare timing. They are stored alongside the device sections in the
//! configuration file under the `collection` key.

use crate::error::{Result, ThrustRigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default minimum spacing between two samples
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default number of rows kept in memory before archiving
pub const DEFAULT_BUFFER_CAPACITY: usize = 1200;

/// Default number of rows moved to the overflow store per archive pass
pub const DEFAULT_ARCHIVE_BLOCK: usize = 200;

/// Default pulse the actuator is parked at when a session stops
pub const DEFAULT_PARK_PULSE: u32 = 1000;

/// Settings for the collection loop, buffer and actuator/tare timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// Minimum inter-sample spacing in milliseconds
    pub poll_interval_ms: u64,

    /// Rows kept in memory before the oldest block is archived
    pub buffer_capacity: usize,

    /// Rows moved to the overflow store per archive pass
    pub archive_block: usize,

    /// Overflow store location (defaults to the app data directory)
    pub overflow_path: Option<PathBuf>,

    /// Serial read timeout for line-oriented sensors in milliseconds
    pub read_timeout_ms: u64,

    /// Pulse sent to the actuator before it is closed
    pub park_pulse: u32,

    /// How long to let the park command take effect in milliseconds
    pub park_settle_ms: u64,

    /// Idle time between actuator reader polls in milliseconds
    pub pwm_poll_ms: u64,

    /// Tare attempts
    pub tare_samples: usize,

    /// Spacing between tare attempts in milliseconds
    pub tare_spacing_ms: u64,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            archive_block: DEFAULT_ARCHIVE_BLOCK,
            overflow_path: None,
            read_timeout_ms: 1000,
            park_pulse: DEFAULT_PARK_PULSE,
            park_settle_ms: 500,
            pwm_poll_ms: 10,
            tare_samples: 10,
            tare_spacing_ms: 100,
        }
    }
}

impl CollectionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn park_settle(&self) -> Duration {
        Duration::from_millis(self.park_settle_ms)
    }

    pub fn pwm_poll(&self) -> Duration {
        Duration::from_millis(self.pwm_poll_ms.max(1))
    }

    pub fn tare_spacing(&self) -> Duration {
        Duration::from_millis(self.tare_spacing_ms)
    }

    /// Resolve the overflow store path, falling back to the app data directory
    pub fn resolved_overflow_path(&self) -> Result<PathBuf> {
        match &self.overflow_path {
            Some(path) => Ok(path.clone()),
            None => Ok(super::ensure_app_data_dir()?.join(super::OVERFLOW_FILE)),
        }
    }

    /// Check the buffer bounds are usable
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(ThrustRigError::Configuration(
                "buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.archive_block == 0 || self.archive_block > self.buffer_capacity {
            return Err(ThrustRigError::Configuration(format!(
                "archive_block must be between 1 and buffer_capacity ({}), got {}",
                self.buffer_capacity, self.archive_block
            )));
        }
        if !(1000..=2000).contains(&self.park_pulse) {
            return Err(ThrustRigError::Configuration(format!(
                "park_pulse must be within 1000..=2000, got {}",
                self.park_pulse
            )));
        }
        Ok(())
    }
}
