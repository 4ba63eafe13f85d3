//! Error handling for the thrustrig runtime
//!
//! Only conditions that abort an operation live here. Expected absent data
//! (garbled frames, short packets, read timeouts) is never an error: drivers
//! report it as a missing [`Reading`](crate::types::Reading) instead.

use thiserror::Error;

/// Main error type for thrustrig operations
#[derive(Error, Debug)]
pub enum ThrustRigError {
    /// A serial device could not be opened or talked to (missing, busy, permissions)
    #[error("Transport error on {port}: {message}")]
    Transport { port: String, message: String },

    /// Invalid or unusable configuration (e.g. measurement tool not installed)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A sensor produced no usable samples when some were required
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ThrustRigError>,
    },
}

impl ThrustRigError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ThrustRigError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a transport error for a named port
    pub fn transport(port: impl Into<String>, message: impl ToString) -> Self {
        ThrustRigError::Transport {
            port: port.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error (or the error it wraps) is a transport failure
    pub fn is_transport(&self) -> bool {
        match self {
            ThrustRigError::Transport { .. } => true,
            ThrustRigError::WithContext { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Whether this error (or the error it wraps) is a configuration failure
    pub fn is_configuration(&self) -> bool {
        match self {
            ThrustRigError::Configuration(_) => true,
            ThrustRigError::WithContext { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ThrustRigError {
    fn from(err: serde_json::Error) -> Self {
        ThrustRigError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ThrustRigError {
    fn from(err: csv::Error) -> Self {
        ThrustRigError::Serialization(err.to_string())
    }
}

impl<W> From<csv::IntoInnerError<W>> for ThrustRigError {
    fn from(err: csv::IntoInnerError<W>) -> Self {
        ThrustRigError::Io(err.into_error())
    }
}

/// Result type alias for thrustrig operations
pub type Result<T> = std::result::Result<T, ThrustRigError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ThrustRigError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ThrustRigError::Io(e).with_context(f()))
    }
}
