//! Test data builders for creating test objects

use tempfile::TempDir;
use thrustrig::config::DEVICE_NAMES;
use thrustrig::RigConfig;

/// Builder for rig configurations that keep their files inside a temp dir
pub struct RigConfigBuilder {
    config: RigConfig,
}

impl RigConfigBuilder {
    /// Fast timings, nothing enabled, overflow store under `dir`
    pub fn new(dir: &TempDir) -> Self {
        let mut config = RigConfig::default();
        config.collection.overflow_path = Some(dir.path().join("overflow.csv"));
        config.collection.poll_interval_ms = 10;
        config.collection.read_timeout_ms = 50;
        config.collection.park_settle_ms = 0;
        config.collection.tare_spacing_ms = 0;
        config.batt.timeout_ms = 50;
        Self { config }
    }

    pub fn enable(mut self, name: &str) -> Self {
        self.config
            .set_device_enabled(name, true)
            .unwrap_or_else(|e| panic!("unknown device {}: {}", name, e));
        self
    }

    pub fn enable_all(mut self) -> Self {
        for name in DEVICE_NAMES {
            self = self.enable(name);
        }
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.collection.poll_interval_ms = ms;
        self
    }

    pub fn buffer(mut self, capacity: usize, block: usize) -> Self {
        self.config.collection.buffer_capacity = capacity;
        self.config.collection.archive_block = block;
        self
    }

    pub fn thrust_calibration(mut self, offset: f64, scale: f64) -> Self {
        self.config.thrust.offset = offset;
        self.config.thrust.scale = scale;
        self
    }

    pub fn decouple_rpm(mut self) -> Self {
        self.config.rpm.decouple = true;
        self
    }

    pub fn build(self) -> RigConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rig_config_builder() {
        let dir = tempfile::tempdir().unwrap();
        let config = RigConfigBuilder::new(&dir)
            .enable("thrust")
            .buffer(10, 5)
            .thrust_calibration(2.0, 4.0)
            .build();

        assert!(config.thrust.enable);
        assert!(!config.temp.enable);
        assert_eq!(config.collection.buffer_capacity, 10);
        assert_eq!(config.thrust.scale, 4.0);
        assert!(config.collection.overflow_path.unwrap().starts_with(dir.path()));
    }
}
