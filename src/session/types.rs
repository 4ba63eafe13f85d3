//! Session data types

use crate::types::CollectionStats;
use serde::Serialize;

/// Lifecycle of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    /// No devices held, configuration may change
    #[default]
    Stopped,
    /// Collector running, devices held
    Running,
}

impl SessionState {
    /// Check if the collector is running
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Stopped => "Stopped",
            SessionState::Running => "Running",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Point-in-time view of a session, for status displays
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Rows currently held in memory
    pub buffered_rows: usize,
    /// Last-known actuator pulse
    pub pwm: Option<u32>,
    pub ramp_active: bool,
    pub stats: CollectionStats,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pwm = self
            .pwm
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} | {} rows buffered | pwm {}{} | {}",
            self.state,
            self.buffered_rows,
            pwm,
            if self.ramp_active { " (ramping)" } else { "" },
            self.stats
        )
    }
}
