//! Core data types for thrustrig
//!
//! # Main Types
//!
//! - [`Reading`] - One sensor value, `None` when the sensor had nothing usable
//! - [`SampleRow`] - One polling tick: timestamp plus every column of the schema
//! - [`CollectionStats`] - Snapshot of the collector's counters
//!
//! # Column Schema
//!
//! Every row has the same fixed width ([`SCHEMA_WIDTH`] values after the
//! timestamp) in the order given by [`COLUMNS`]. A disabled sensor contributes
//! missing values for its columns rather than shrinking the row.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A single measured value; `None` is the missing-value marker (never zero)
pub type Reading = Option<f64>;

/// Column headers of the delimited export, timestamp first
pub const COLUMNS: [&str; 8] = [
    "Timestamp",
    "Coil Temperature (C)",
    "Voltage (V)",
    "Current (A)",
    "Batt Temperature (C)",
    "Thrust (N)",
    "RPM",
    "PWM",
];

/// Number of value columns following the timestamp
pub const SCHEMA_WIDTH: usize = COLUMNS.len() - 1;

/// Timestamp rendering used in the overflow store and exports (sortable, local clock)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One row of the session's time series
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    /// Wall-clock time the tick started
    pub timestamp: DateTime<Local>,
    /// Values in [`COLUMNS`] order (excluding the timestamp)
    pub values: [Reading; SCHEMA_WIDTH],
}

impl SampleRow {
    /// Build a row from a list of readings
    ///
    /// Returns `None` when the number of readings does not match the schema,
    /// which the collector treats as a dropped row.
    pub fn from_readings(timestamp: DateTime<Local>, readings: &[Reading]) -> Option<Self> {
        let values: [Reading; SCHEMA_WIDTH] = readings.try_into().ok()?;
        Some(Self { timestamp, values })
    }

    pub fn coil_temperature(&self) -> Reading {
        self.values[0]
    }

    pub fn voltage(&self) -> Reading {
        self.values[1]
    }

    pub fn current(&self) -> Reading {
        self.values[2]
    }

    pub fn batt_temperature(&self) -> Reading {
        self.values[3]
    }

    pub fn thrust(&self) -> Reading {
        self.values[4]
    }

    pub fn rpm(&self) -> Reading {
        self.values[5]
    }

    pub fn pwm(&self) -> Reading {
        self.values[6]
    }

    /// Fields of one delimited record in [`COLUMNS`] order; missing values are empty
    pub fn to_record(&self) -> Vec<String> {
        std::iter::once(self.timestamp.format(TIMESTAMP_FORMAT).to_string())
            .chain(
                self.values
                    .iter()
                    .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
            )
            .collect()
    }
}

/// Lock-free counters shared between the collector thread and callers
#[derive(Debug, Default)]
pub struct CollectionCounters {
    running: AtomicBool,
    ticks: AtomicU64,
    rows_appended: AtomicU64,
    rows_dropped: AtomicU64,
    rows_archived: AtomicU64,
    archive_failures: AtomicU64,
    last_tick_us: AtomicU64,
    max_tick_us: AtomicU64,
}

impl CollectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Record the duration of one tick's sensor reads
    pub fn record_tick(&self, elapsed_us: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_us.store(elapsed_us, Ordering::Relaxed);
        self.max_tick_us.fetch_max(elapsed_us, Ordering::Relaxed);
    }

    pub fn record_appended(&self) {
        self.rows_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.rows_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_archived(&self, rows: usize) {
        self.rows_archived.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_archive_failure(&self) {
        self.archive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for display
    pub fn snapshot(&self) -> CollectionStats {
        CollectionStats {
            running: self.running.load(Ordering::SeqCst),
            ticks: self.ticks.load(Ordering::Relaxed),
            rows_appended: self.rows_appended.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            rows_archived: self.rows_archived.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
            last_tick_ms: self.last_tick_us.load(Ordering::Relaxed) as f64 / 1000.0,
            max_tick_ms: self.max_tick_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }

    /// Zero every counter (used on reset)
    pub fn clear(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.rows_appended.store(0, Ordering::Relaxed);
        self.rows_dropped.store(0, Ordering::Relaxed);
        self.rows_archived.store(0, Ordering::Relaxed);
        self.archive_failures.store(0, Ordering::Relaxed);
        self.last_tick_us.store(0, Ordering::Relaxed);
        self.max_tick_us.store(0, Ordering::Relaxed);
    }
}

/// Collection statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Whether the collection loop is running
    pub running: bool,
    /// Polling ticks completed (appended or dropped)
    pub ticks: u64,
    /// Rows appended to the sample buffer
    pub rows_appended: u64,
    /// Rows discarded because their width did not match the schema
    pub rows_dropped: u64,
    /// Rows moved to the overflow store
    pub rows_archived: u64,
    /// Archive passes that could not write the overflow store
    pub archive_failures: u64,
    /// Duration of the most recent tick's sensor reads
    pub last_tick_ms: f64,
    /// Longest tick observed
    pub max_tick_ms: f64,
}

impl std::fmt::Display for CollectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | ticks {} | rows {} (dropped {}, archived {}) | tick {:.1} ms (max {:.1} ms)",
            if self.running { "running" } else { "stopped" },
            self.ticks,
            self.rows_appended,
            self.rows_dropped,
            self.rows_archived,
            self.last_tick_ms,
            self.max_tick_ms
        )
    }
}
