//! Error types for the bridge.
//!
//! This module defines error codes, the per-runtime exception types that
//! cross the boundary, and the main error type used by the Rust-facing API.

use crate::guest::GuestValue;
use crate::host::HostValue;
use serde::{Deserialize, Serialize};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Value could not be converted across the boundary
    MarshallingError,
    /// Exception raised by host code
    HostException,
    /// Exception raised by guest code
    GuestException,
    /// Invalid argument
    InvalidArgument,
    /// Configuration rejected
    ConfigError,
    /// Bridge module was closed
    BridgeClosed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::MarshallingError => write!(f, "MARSHALLING_ERROR"),
            ErrorCode::HostException => write!(f, "HOST_EXCEPTION"),
            ErrorCode::GuestException => write!(f, "GUEST_EXCEPTION"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::ConfigError => write!(f, "CONFIG_ERROR"),
            ErrorCode::BridgeClosed => write!(f, "BRIDGE_CLOSED"),
        }
    }
}

/// An error raised in the host runtime.
///
/// `value` is what host code sees as the error object: a plain string for
/// errors raised by host code or the bridge, or a bridged guest error when
/// the exception came from the guest.
#[derive(Debug, Clone, PartialEq)]
pub struct HostException {
    /// Error value as seen by host code
    pub value: HostValue,
    /// Human-readable message
    pub message: String,
    /// Host traceback, when one was captured at a crossing
    pub traceback: Option<String>,
}

impl HostException {
    /// Create an exception whose value is the message string
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            value: HostValue::String(message.clone()),
            message,
            traceback: None,
        }
    }

    /// Create an exception carrying an arbitrary host value
    pub fn with_value(value: HostValue, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
            traceback: None,
        }
    }

    /// Add a traceback
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

impl std::fmt::Display for HostException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HostException {}

/// An exception thrown in the guest engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestException {
    /// Thrown value
    pub value: GuestValue,
    /// Human-readable message
    pub message: String,
    /// Guest stack description, when available
    pub stack: Option<String>,
}

impl GuestException {
    /// Create an exception from a thrown value
    pub fn new(value: GuestValue, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
            stack: None,
        }
    }

    /// Add a stack description
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for GuestException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GuestException {}

/// Main error type for the bridge API
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Host exception
    #[error("Host exception: {0}")]
    Host(#[from] HostException),

    /// Guest exception
    #[error("Guest exception: {0}")]
    Guest(#[from] GuestException),

    /// Marshalling error with no safe default
    #[error("Marshalling error: {0}")]
    Marshalling(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The bridge module has been closed
    #[error("Bridge is closed")]
    Closed,
}

impl RuntimeError {
    /// Error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RuntimeError::Config(_) => ErrorCode::ConfigError,
            RuntimeError::Host(_) => ErrorCode::HostException,
            RuntimeError::Guest(_) => ErrorCode::GuestException,
            RuntimeError::Marshalling(_) => ErrorCode::MarshallingError,
            RuntimeError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            RuntimeError::Closed => ErrorCode::BridgeClosed,
        }
    }

    /// Convert into an exception host code can catch
    pub fn into_host_exception(self) -> HostException {
        match self {
            RuntimeError::Host(e) => e,
            other => HostException::new(other.to_string()),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error codes returned by flat table functions
pub mod error_codes {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// Permission denied
    pub const PERMISSION_DENIED: i32 = -1;
    /// Not found
    pub const NOT_FOUND: i32 = -2;
    /// Invalid argument
    pub const INVALID_ARGUMENT: i32 = -3;
    /// I/O failure
    pub const IO_ERROR: i32 = -4;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -5;

    /// Symbolic name for a code
    pub fn symbol(code: i32) -> String {
        match code {
            SUCCESS => "SUCCESS".into(),
            PERMISSION_DENIED => "EPERM".into(),
            NOT_FOUND => "ENOENT".into(),
            INVALID_ARGUMENT => "EINVAL".into(),
            IO_ERROR => "EIO".into(),
            INTERNAL_ERROR => "EINTERNAL".into(),
            other => format!("E{}", other.unsigned_abs()),
        }
    }

    /// Map an I/O error onto a flat table code
    pub fn from_io(err: &std::io::Error) -> i32 {
        match err.kind() {
            std::io::ErrorKind::NotFound => NOT_FOUND,
            std::io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
            std::io::ErrorKind::InvalidInput => INVALID_ARGUMENT,
            _ => IO_ERROR,
        }
    }
}
