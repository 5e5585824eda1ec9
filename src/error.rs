//! Error types for loopback runs.

use thiserror::Error;

use crate::{
    coordinator::{CoordinatorState, JoinReport},
    device::CompletionReport,
};

/// Errors raised while building, arming or running a loopback capture.
#[derive(Debug, Error)]
pub enum LoopbackError {
    /// Waveform or run parameters violate a physical or timing constraint.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A structural argument (repeat count, buffer size, rate) is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device or transport rejected a command.
    #[error("{command} command rejected: {reason}")]
    DeviceCommand { command: String, reason: String },

    /// At least one data-movement worker finished with a non-success status.
    #[error("stream completion error (tx: {tx}; rx: {rx})")]
    StreamCompletion {
        tx: CompletionReport,
        rx: CompletionReport,
    },

    /// The stop command was rejected after both workers joined.
    #[error("stream stop rejected: {reason} ({report})")]
    StopFailed { reason: String, report: JoinReport },

    /// A coordinator operation was invoked out of order.
    #[error("coordinator is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: CoordinatorState,
        actual: CoordinatorState,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LoopbackError {
    pub fn device_command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceCommand {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoopbackError>;
