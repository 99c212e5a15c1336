//! Events published by the detector.
//!
//! Hosts receive everything through one broadcast channel of [`DetectorEvent`]:
//! acquisition results and status notifications. Results carry one shared time
//! axis and one labelled trace per enabled channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DsoError;

/// Labelled axis of a 1-D result.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub label: String,
    pub units: String,
    pub data: Vec<f64>,
}

impl Axis {
    /// Time axis of an oscilloscope trace.
    pub fn time_of_flight(data: Vec<f64>) -> Self {
        Self {
            label: "Time of flight".to_string(),
            units: "s".to_string(),
            data,
        }
    }
}

/// Samples of one channel.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTrace {
    pub label: String,
    pub data: Vec<f64>,
}

/// One grab: a shared time axis plus a trace per enabled channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionResult {
    /// Result name, taken from the acquisition configuration
    pub name: String,
    /// When the grab started
    pub timestamp: DateTime<Utc>,
    /// Time axis shared by every trace
    pub time_axis: Axis,
    /// Traces in channel-list order
    pub channels: Vec<ChannelTrace>,
}

impl AcquisitionResult {
    /// Labels of the traces, in order.
    pub fn labels(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.label.as_str()).collect()
    }

    /// Trace with the given label.
    pub fn channel(&self, label: &str) -> Option<&ChannelTrace> {
        self.channels.iter().find(|c| c.label == label)
    }

    /// True when no channel was enabled.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Severity of a status notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status notification for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Severity
    pub level: StatusLevel,
    /// Short tag, e.g. "initialize" or an error kind
    pub title: String,
    /// Human-readable detail
    pub message: String,
}

impl StatusMessage {
    /// Informational status.
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Warning status for a degraded but recoverable condition.
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Warning,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Error status for a failed operation.
    pub fn from_error(operation: &str, err: &DsoError) -> Self {
        Self {
            level: StatusLevel::Error,
            title: err.kind().to_string(),
            message: format!("{operation}: {err}"),
        }
    }
}

/// Everything the detector publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DetectorEvent {
    /// A completed grab
    Data(AcquisitionResult),
    /// A status notification
    Status(StatusMessage),
}
