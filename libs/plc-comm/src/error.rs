//! Communication Error Types
//!
//! Every fallible operation in this crate returns [`Result`]. A success is
//! `Ok(payload)` (error code 0); a failure carries an error code and a
//! readable message:
//!
//! - negative codes come from the transport layer (the pipe's consecutive
//!   error count, or [`SOCKET_ERROR_CODE`] for socket creation/connect faults)
//! - positive codes are vendor protocol codes (HostLink end codes, Modbus
//!   exception codes)
//! - [`GENERIC_ERROR_CODE`] marks local failures such as unparsable addresses

use thiserror::Error;

/// Result type for plc-comm operations
pub type Result<T> = std::result::Result<T, CommError>;

/// Error code used for socket creation and connect failures
pub const SOCKET_ERROR_CODE: i32 = -1;

/// Error code for failures that are neither transport nor vendor specific
pub const GENERIC_ERROR_CODE: i32 = 10000;

/// Communication errors
#[derive(Debug, Error)]
pub enum CommError {
    /// Connect did not finish within the configured timeout
    #[error("Connect to {endpoint} timed out after {timeout_ms} ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    /// No progress while receiving within the stall timeout
    #[error("Receive timed out after {timeout_ms} ms ({received} bytes received)")]
    ReceiveTimeout {
        code: i32,
        timeout_ms: u64,
        received: usize,
    },

    /// Peer closed the stream mid-read
    #[error("Remote closed the connection")]
    RemoteClosed { code: i32 },

    /// OS or medium level fault
    #[error("Transport error: {message}")]
    Transport { code: i32, message: String },

    /// Vendor status code other than success
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i32, message: String },

    /// Response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Operation, data type or device series not supported
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Address string cannot be parsed
    #[error("Address format error: {0}")]
    Format(String),

    /// Offset or length outside of a buffer
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for CommError {
    fn from(err: std::io::Error) -> Self {
        CommError::Transport {
            code: SOCKET_ERROR_CODE,
            message: err.to_string(),
        }
    }
}

impl From<figment::Error> for CommError {
    fn from(err: figment::Error) -> Self {
        CommError::Config(err.to_string())
    }
}

// Helper methods for creating errors
impl CommError {
    pub fn transport(code: i32, msg: impl Into<String>) -> Self {
        CommError::Transport {
            code,
            message: msg.into(),
        }
    }

    pub fn protocol(code: i32, msg: impl Into<String>) -> Self {
        CommError::Protocol {
            code,
            message: msg.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        CommError::InvalidResponse(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        CommError::Unsupported(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        CommError::Format(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        CommError::OutOfRange(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CommError::Config(msg.into())
    }

    /// Numeric error code, never 0
    pub fn error_code(&self) -> i32 {
        match self {
            CommError::ConnectTimeout { .. } => SOCKET_ERROR_CODE,
            CommError::ReceiveTimeout { code, .. }
            | CommError::RemoteClosed { code }
            | CommError::Transport { code, .. }
            | CommError::Protocol { code, .. } => *code,
            CommError::InvalidResponse(_)
            | CommError::Unsupported(_)
            | CommError::Format(_)
            | CommError::OutOfRange(_)
            | CommError::Config(_) => GENERIC_ERROR_CODE,
        }
    }

    /// True for errors raised by the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CommError::ConnectTimeout { .. }
                | CommError::ReceiveTimeout { .. }
                | CommError::RemoteClosed { .. }
                | CommError::Transport { .. }
        )
    }

    /// Check if this error leaves the pipe closed so the caller has to reopen it
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            CommError::ConnectTimeout { .. }
                | CommError::RemoteClosed { .. }
                | CommError::Transport { .. }
                | CommError::ReceiveTimeout { .. }
        )
    }
}
