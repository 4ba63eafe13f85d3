//! # thrustrig: Thrust Test-Stand Runtime
//!
//! Acquisition and actuation for a small thrust-measurement rig. Serial
//! instruments (coil temperature, battery meter, load cell), an RPM probe
//! driven through sigrok-cli and a PWM actuator board are polled on a fixed
//! cadence into a bounded time series that spills to disk and exports as
//! delimited text.
//!
//! ## Architecture
//!
//! - **Backend**: device transports, sensor drivers, the actuator and the collector thread
//! - **Session**: lifecycle, sample buffer and overflow store
//! - **Config**: the per-device JSON configuration and acquisition settings
//! - **Communication**: crossbeam channels for shutdown, atomics for shared flags
//!
//! ## Data Location
//!
//! The default configuration, the overflow store and log files live in the
//! platform data directory under `thrustrig`:
//!
//! - **Linux**: `~/.local/share/thrustrig/`
//! - **macOS**: `~/Library/Application Support/thrustrig/`
//! - **Windows**: `%APPDATA%\thrustrig\`
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use thrustrig::{RigConfig, SerialConnector, Session};
//!
//! fn main() -> thrustrig::Result<()> {
//!     let config = RigConfig::load_or_default("rig.json");
//!     let mut session = Session::new(config, Arc::new(SerialConnector))?;
//!
//!     session.start()?;
//!     session.start_ramp(1800, 20, 0.5);
//!     std::thread::sleep(std::time::Duration::from_secs(30));
//!     session.stop()?;
//!
//!     session.export_to("run.csv")
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{Connector, PwmDriver, Sensor, SerialConnector, SimConnector};
pub use config::{CollectionSettings, RigConfig};
pub use error::{Result, ThrustRigError};
pub use session::{SampleBuffer, Session, SessionState, SessionStatus};
pub use types::{CollectionStats, Reading, SampleRow, COLUMNS};
