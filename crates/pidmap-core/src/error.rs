//! Error types for pidmap.
//!
//! Errors raised by the device transport and the shell probes. Resolution
//! tasks never let these escape into the registry's read path; they are
//! surfaced only by `refresh()` (snapshot failure) and by the explicit
//! configuration and transport entry points.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the pidmap library.
#[derive(Debug, Error)]
pub enum PidmapError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Command `{command}` failed with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Device disconnected: {serial}")]
    DeviceDisconnected { serial: String },

    // Output parsing errors
    #[error("Malformed {what}: {line:?}")]
    Parse { what: &'static str, line: String },

    #[error("Resolution cancelled")]
    Cancelled,

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: &'static str, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for pidmap operations.
pub type Result<T> = std::result::Result<T, PidmapError>;

impl From<std::io::Error> for PidmapError {
    fn from(err: std::io::Error) -> Self {
        PidmapError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PidmapError {
    fn from(err: serde_json::Error) -> Self {
        PidmapError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PidmapError {
    /// Create a parse error for a specific line of probe output.
    pub fn parse(what: &'static str, line: impl Into<String>) -> Self {
        PidmapError::Parse {
            what,
            line: line.into(),
        }
    }

    /// Check if this error is worth retrying on a later call.
    ///
    /// Transport-class failures are transient; malformed output and
    /// configuration errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PidmapError::Transport { .. }
                | PidmapError::Timeout(_)
                | PidmapError::DeviceDisconnected { .. }
                | PidmapError::Io { .. }
        )
    }
}
