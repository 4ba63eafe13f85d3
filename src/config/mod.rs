//! Configuration module for thrustrig
//!
//! The rig is described by a JSON object keyed by device name:
//!
//! ```json
//! {
//!   "temp":   { "enable": true,  "port": "/dev/ttyUSB0", "baudrate": 115200 },
//!   "batt":   { "enable": true,  "port": "/dev/ttyUSB1", "baudrate": 115200 },
//!   "thrust": { "enable": true,  "port": "/dev/ttyUSB2", "baudrate": 115200,
//!               "offset": 8421.0, "scale": 105.3, "senlen": 1.0, "efflen": 1.0 },
//!   "rpm":    { "enable": false, "path": "/usr/bin/sigrok-cli" },
//!   "pwm":    { "enable": true,  "port": "/dev/ttyACM0", "baudrate": 115200 }
//! }
//! ```
//!
//! Every field has a compiled-in default, so missing keys fall back silently
//! and unknown keys are ignored. The file is rewritten on every accepted edit.
//!
//! # App Data Location
//!
//! The default config file, the overflow store and the log files live in the
//! platform data directory under [`APP_ID`]:
//! - **Linux**: `~/.local/share/thrustrig/`
//! - **macOS**: `~/Library/Application Support/thrustrig/`
//! - **Windows**: `%APPDATA%\thrustrig\`

pub mod settings;

pub use settings::*;

use crate::error::{Result, ThrustRigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "thrustrig";

/// Config filename
pub const CONFIG_FILE: &str = "config.json";

/// Overflow store filename
pub const OVERFLOW_FILE: &str = "overflow.csv";

/// Default serial baud rate for every device
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Default sigrok-cli location
pub const DEFAULT_SIGROK_PATH: &str = "/usr/bin/sigrok-cli";

/// Default sigrok driver string for the UNI-T UT372 tachometer
pub const DEFAULT_SIGROK_DRIVER: &str = "uni-t-ut372:conn=1a86.e008";

/// Device names, in column order
pub const DEVICE_NAMES: [&str; 5] = ["temp", "batt", "thrust", "rpm", "pwm"];

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        ThrustRigError::Configuration("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            ThrustRigError::Configuration(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Device Sections ====================

/// A serial device with no calibration (temperature probe, battery meter, PWM board)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialDeviceConfig {
    pub enable: bool,
    pub port: String,
    pub baudrate: u32,
}

impl SerialDeviceConfig {
    fn with_port(port: &str) -> Self {
        Self {
            enable: false,
            port: port.to_string(),
            baudrate: DEFAULT_BAUDRATE,
        }
    }
}

impl Default for SerialDeviceConfig {
    fn default() -> Self {
        Self::with_port("/dev/ttyUSB0")
    }
}

/// Battery meter section; adds the frame scan timeout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub enable: bool,
    pub port: String,
    pub baudrate: u32,
    /// How long one read may scan for a `:r50` frame
    pub timeout_ms: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            enable: false,
            port: "/dev/ttyUSB1".to_string(),
            baudrate: DEFAULT_BAUDRATE,
            timeout_ms: 100,
        }
    }
}

/// Load cell section with its calibration constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrustConfig {
    pub enable: bool,
    pub port: String,
    pub baudrate: u32,
    /// Raw reading at zero load (set by tare)
    pub offset: f64,
    /// Raw counts per newton
    pub scale: f64,
    /// Distance from the pivot to the load cell
    pub senlen: f64,
    /// Distance from the pivot to the thrust line
    pub efflen: f64,
}

impl Default for ThrustConfig {
    fn default() -> Self {
        Self {
            enable: false,
            port: "/dev/ttyUSB2".to_string(),
            baudrate: DEFAULT_BAUDRATE,
            offset: 0.0,
            scale: 1.0,
            senlen: 1.0,
            efflen: 1.0,
        }
    }
}

/// Tachometer section; readings come from a one-shot external tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpmConfig {
    pub enable: bool,
    /// Path to the sigrok-cli executable
    pub path: PathBuf,
    /// sigrok `--driver` argument
    pub driver: String,
    /// Poll on a dedicated thread instead of inside the collector tick
    pub decouple: bool,
}

impl Default for RpmConfig {
    fn default() -> Self {
        Self {
            enable: false,
            path: PathBuf::from(DEFAULT_SIGROK_PATH),
            driver: DEFAULT_SIGROK_DRIVER.to_string(),
            decouple: false,
        }
    }
}

// ==================== Rig Config ====================

/// Complete rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Coil temperature probe
    pub temp: SerialDeviceConfig,
    /// Battery voltage/current/temperature meter
    pub batt: BatteryConfig,
    /// Thrust load cell
    pub thrust: ThrustConfig,
    /// RPM probe
    pub rpm: RpmConfig,
    /// PWM actuator board
    pub pwm: SerialDeviceConfig,
    /// Acquisition settings
    pub collection: CollectionSettings,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            temp: SerialDeviceConfig::with_port("/dev/ttyUSB0"),
            batt: BatteryConfig::default(),
            thrust: ThrustConfig::default(),
            rpm: RpmConfig::default(),
            pwm: SerialDeviceConfig::with_port("/dev/ttyACM0"),
            collection: CollectionSettings::default(),
        }
    }
}

impl RigConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON text, merging over defaults
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ThrustRigError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ThrustRigError::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_json(&content)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration to disk as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ThrustRigError::Configuration(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ThrustRigError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            ThrustRigError::Configuration(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Enable or disable a device by its configuration key
    pub fn set_device_enabled(&mut self, name: &str, enable: bool) -> Result<()> {
        match name {
            "temp" => self.temp.enable = enable,
            "batt" => self.batt.enable = enable,
            "thrust" => self.thrust.enable = enable,
            "rpm" => self.rpm.enable = enable,
            "pwm" => self.pwm.enable = enable,
            other => {
                return Err(ThrustRigError::Configuration(format!(
                    "Unknown device '{}', expected one of {}",
                    other,
                    DEVICE_NAMES.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// Whether a device is enabled, by configuration key
    pub fn device_enabled(&self, name: &str) -> Option<bool> {
        match name {
            "temp" => Some(self.temp.enable),
            "batt" => Some(self.batt.enable),
            "thrust" => Some(self.thrust.enable),
            "rpm" => Some(self.rpm.enable),
            "pwm" => Some(self.pwm.enable),
            _ => None,
        }
    }
}
