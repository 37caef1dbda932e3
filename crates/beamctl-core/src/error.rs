//! Error handling for beamctl
//!
//! Provides error types for every layer of device control:
//! - Control errors (command exchange, raw mode, device responses)
//! - Connection errors (transport)
//! - Framing errors (outline tracing and safety interlocks)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::mode::ConnectionMode;
use thiserror::Error;

/// Control error type
///
/// Raised by the command queue, the response correlator and the raw-mode
/// session. Every variant is cloneable so one failure can both be returned
/// to the caller and published as an event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// Operation requires a different connection mode
    #[error("Operation requires {expected} mode, connection is in {actual} mode")]
    Mode {
        /// The mode the operation needs.
        expected: ConnectionMode,
        /// The mode the connection is currently in.
        actual: ConnectionMode,
    },

    /// No terminal response arrived in time
    #[error("Device did not respond within {timeout_ms}ms")]
    Timeout {
        /// The inactivity timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Device reported a reset (`ER:RESET` / `DEBUG: RESET`)
    #[error("Device reset: {response}")]
    DeviceReset {
        /// The accumulated response text.
        response: String,
    },

    /// Device rejected the command
    #[error("Device error: {response}")]
    DeviceError {
        /// The accumulated response text.
        response: String,
    },

    /// Device sent an unrecoverable error notification
    #[error("Fatal device error: {payload}")]
    Fatal {
        /// The fatal notification payload.
        payload: String,
    },

    /// Response did not contain the expected data
    #[error("Failed to parse device response: {reason}")]
    Parse {
        /// What was missing or malformed.
        reason: String,
    },

    /// The task was dropped from the queue before it ran
    #[error("Command queue was reset before the task ran")]
    QueueReset,

    /// The inbound message stream closed
    #[error("Connection to device lost")]
    ConnectionLost,

    /// The transport failed to deliver a command
    #[error("Transport error: {reason}")]
    Transport {
        /// The reason the send failed.
        reason: String,
    },
}

impl ControlError {
    /// Build a mode error for an operation that needs `expected`.
    pub fn mode(expected: ConnectionMode, actual: ConnectionMode) -> Self {
        ControlError::Mode { expected, actual }
    }

    /// Build a parse error from any message.
    pub fn parse(reason: impl Into<String>) -> Self {
        ControlError::Parse {
            reason: reason.into(),
        }
    }
}

/// Connection error type
///
/// Represents errors establishing or using the transport to the device.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to connect
    #[error("Failed to connect to {address}: {reason}")]
    FailedToConnect {
        /// The address that was dialed.
        address: String,
        /// The reason the connection failed.
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Transport is not connected
    #[error("Not connected")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Framing error type
///
/// Represents failures of an outline framing run that are not device
/// protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FramingError {
    /// Door open while the head would enter the hazard region
    #[error("Door opened while moving to ({x:.1}, {y:.1})")]
    SafetyInterlock {
        /// Target X in millimetres.
        x: f64,
        /// Target Y in millimetres.
        y: f64,
    },

    /// Device is busy with another job
    #[error("Device is not idle (state {state_id})")]
    DeviceNotReady {
        /// The reported machine state id.
        state_id: i64,
    },

    /// Nothing to trace
    #[error("No content to frame")]
    NoContent,

    /// The device cannot perform this kind of framing
    #[error("Unsupported framing: {reason}")]
    Unsupported {
        /// Why the request cannot be served.
        reason: String,
    },
}

/// Main error type for beamctl
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Control error
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Framing error
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Control(ControlError::Timeout { .. })
                | Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a mode error
    pub fn is_mode_error(&self) -> bool {
        matches!(self, Error::Control(ControlError::Mode { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Control(ControlError::ConnectionLost)
        )
    }

    /// Check if the device itself reported the failure
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Error::Control(
                ControlError::DeviceError { .. }
                    | ControlError::DeviceReset { .. }
                    | ControlError::Fatal { .. }
            )
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_error_display() {
        let err = ControlError::mode(ConnectionMode::Raw, ConnectionMode::Normal);
        assert_eq!(
            err.to_string(),
            "Operation requires raw mode, connection is in normal mode"
        );
        assert!(Error::from(err).is_mode_error());
    }

    #[test]
    fn test_error_classification() {
        let timeout: Error = ControlError::Timeout { timeout_ms: 30000 }.into();
        assert!(timeout.is_timeout());
        assert!(!timeout.is_device_error());

        let reset: Error = ControlError::DeviceReset {
            response: "ER:RESET".into(),
        }
        .into();
        assert!(reset.is_device_error());

        let lost: Error = ControlError::ConnectionLost.into();
        assert!(lost.is_connection_error());
    }

    #[test]
    fn test_interlock_display() {
        let err = FramingError::SafetyInterlock { x: 12.0, y: 3.5 };
        assert_eq!(err.to_string(), "Door opened while moving to (12.0, 3.5)");
    }
}
