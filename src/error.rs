//! Custom error types for the detector.
//!
//! `DsoError` is the single error type returned by the settings dispatcher, the
//! acquisition loop and the drivers. Every failure is terminal for the operation
//! that raised it: nothing in this crate retries.
//!
//! ## Error Hierarchy
//!
//! - **`ConnectionUnavailable`**: no instrument was found, the driver handle is
//!   missing (detector not initialized or already closed), or the transport could
//!   not be opened.
//! - **`CommandRejected`**: the driver failed to deliver a command to the scope.
//! - **`AcquisitionTimeout`**: a waveform fetch did not complete within the
//!   configured acquisition timeout.
//! - **`MalformedConfigurationValue`**: an enumerated string entry (memory size,
//!   time/division) could not be decoded.
//! - **`WaveformTooShort`**: a segmented buffer is shorter than
//!   `segments × segment length`.
//! - **`Parameter*`**: a settings-tree entry refused a value.
//! - **`Config`**: wraps errors from `figment` while loading configuration files.
//! - **`Storage`**: an acquisition result could not be written to disk.
//!
//! By using `#[from]`, `DsoError` can be created from underlying error types with
//! the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the detector error type.
pub type DsoResult<T> = std::result::Result<T, DsoError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DsoError {
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Command '{command}' rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("Acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),

    #[error("Malformed value '{value}' for '{entry}': {reason}")]
    MalformedConfigurationValue {
        entry: String,
        value: String,
        reason: String,
    },

    #[error("Waveform too short: expected at least {expected} samples, got {actual}")]
    WaveformTooShort { expected: usize, actual: usize },

    #[error("Parameter '{0}' is read-only")]
    ParameterReadOnly(String),

    #[error("Invalid value {value} for parameter '{name}'")]
    ParameterInvalidChoice { name: String, value: String },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DsoError {
    /// Build a `CommandRejected` from the command text and any displayable cause.
    pub fn rejected(command: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        DsoError::CommandRejected {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a `MalformedConfigurationValue` for a settings entry.
    pub fn malformed(
        entry: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DsoError::MalformedConfigurationValue {
            entry: entry.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, used as the title of status notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            DsoError::ConnectionUnavailable(_) => "connection_unavailable",
            DsoError::CommandRejected { .. } => "command_rejected",
            DsoError::AcquisitionTimeout(_) => "acquisition_timeout",
            DsoError::MalformedConfigurationValue { .. } => "malformed_configuration_value",
            DsoError::WaveformTooShort { .. } => "waveform_too_short",
            DsoError::ParameterReadOnly(_) | DsoError::ParameterInvalidChoice { .. } => {
                "invalid_parameter"
            }
            DsoError::Config(_) | DsoError::Configuration(_) => "configuration",
            DsoError::Io(_) => "io",
            DsoError::Storage(_) => "storage",
            DsoError::FeatureNotEnabled(_) => "feature_not_enabled",
        }
    }
}

impl From<figment::Error> for DsoError {
    fn from(value: figment::Error) -> Self {
        DsoError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_carries_command_and_reason() {
        let err = DsoError::rejected("TDIV 1NS", "socket closed");
        assert_eq!(err.kind(), "command_rejected");
        assert_eq!(
            err.to_string(),
            "Command 'TDIV 1NS' rejected: socket closed"
        );
    }

    #[test]
    fn malformed_names_entry_and_value() {
        let err = DsoError::malformed("memorySize", "12Q", "unknown suffix");
        assert_eq!(err.kind(), "malformed_configuration_value");
        let msg = err.to_string();
        assert!(msg.contains("memorySize"));
        assert!(msg.contains("12Q"));
    }

    #[test]
    fn timeout_reports_duration() {
        let err = DsoError::AcquisitionTimeout(Duration::from_millis(1500));
        assert_eq!(err.kind(), "acquisition_timeout");
        assert!(err.to_string().contains("1.5s"));
    }
}
