//! # Voltage THZ Error Handling
//!
//! This module provides the error type shared by every layer of the THZ
//! communication stack: the byte transport, the telegram codec, the device
//! session and the value codec.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: low-level socket or serial port failures
//! - **Connection Errors**: channel could not be opened, or was lost
//! - **Timeout Errors**: no complete response telegram within the read timeout
//!
//! ### Protocol Errors
//! - **Protocol / Frame Errors**: missing markers, bad escape sequences, truncated telegrams
//! - **Checksum Errors**: XOR checksum of the response does not match
//! - **Device Status**: the heat pump answered with an error status byte
//!
//! ### Session Errors
//! - **Communication Errors**: an exchange still failed after one reconnect and one retry
//!
//! ### Data Errors
//! - **Decode Errors**: register bytes of the wrong length for their descriptor
//! - **Invalid Data**: values that cannot be encoded for a register
//! - **Unknown Register / Read-only Register / Unsupported Firmware**
//!
//! ## Error Recovery
//!
//! The device session is the only component that retries. It uses
//! [`ThzError::is_recoverable`] to decide whether a failed exchange is worth
//! a reconnect:
//!
//! ```rust
//! use voltage_thz::ThzError;
//!
//! let timeout = ThzError::timeout("read block 0x00FB", 500);
//! assert!(timeout.is_recoverable());
//!
//! let decode = ThzError::decode("outsideTemp", 2, 1);
//! assert!(!decode.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias for THZ operations
pub type ThzResult<T> = Result<T, ThzError>;

/// Errors raised by the THZ communication layer
///
/// Transport and protocol variants are considered transient and trigger the
/// session's reconnect-and-retry path. Everything else is reported to the
/// caller unchanged.
#[derive(Error, Debug, Clone)]
pub enum ThzError {
    /// I/O related errors (socket, serial port, file system)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// The channel could not be established, or was lost during operation
    ///
    /// # Examples
    /// - TCP connection refused by the serial-to-network bridge
    /// - Serial device unplugged
    /// - Peer closed the socket mid-exchange
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation exceeded its time limit
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// General telegram protocol violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Telegram framing failure (markers, escaping, truncation)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// XOR checksum of a telegram did not match its checksum byte
    #[error("Checksum mismatch: expected={expected:02X}, actual={actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The device answered with an error status byte
    ///
    /// # Status Codes
    /// - 0x01: Timing issue
    /// - 0x02: Checksum error in request
    /// - 0x03: Unknown command
    /// - 0x04: Unknown register request
    #[error("Device status {status:02X}: {message}")]
    DeviceStatus { status: u8, message: String },

    /// An exchange failed even after the single reconnect and retry
    ///
    /// Carries the message of the last underlying failure.
    #[error("Communication failed after {attempts} attempt(s): {message}")]
    Communication { message: String, attempts: u32 },

    /// Register bytes did not have the length the descriptor declares
    #[error("Decode error for {register}: expected {expected} byte(s), got {actual}")]
    Decode {
        register: String,
        expected: usize,
        actual: usize,
    },

    /// A value could not be represented for the target register
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// No descriptor with this name in the active register map
    #[error("Unknown register: {name}")]
    UnknownRegister { name: String },

    /// The register exists but has no write layout
    #[error("Register {name} is read-only")]
    ReadOnlyRegister { name: String },

    /// No register map for the firmware reported by the device
    #[error("Unsupported firmware version: {version}")]
    UnsupportedFirmware { version: String },

    /// Session or transport configuration problems
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ThzError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a checksum mismatch error
    pub fn checksum_mismatch(expected: u8, actual: u8) -> Self {
        Self::ChecksumMismatch { expected, actual }
    }

    /// Create a device status error
    ///
    /// Maps the status codes documented for the THZ serial interface to
    /// readable messages.
    pub fn device_status(status: u8) -> Self {
        let message = match status {
            0x01 => "Timing issue",
            0x02 => "CRC error in request",
            0x03 => "Unknown command",
            0x04 => "Unknown register request",
            _ => "Unknown status",
        }
        .to_string();

        Self::DeviceStatus { status, message }
    }

    /// Create a communication error after retry exhaustion
    pub fn communication<S: Into<String>>(message: S, attempts: u32) -> Self {
        Self::Communication {
            message: message.into(),
            attempts,
        }
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(register: S, expected: usize, actual: usize) -> Self {
        Self::Decode {
            register: register.into(),
            expected,
            actual,
        }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create an unknown register error
    pub fn unknown_register<S: Into<String>>(name: S) -> Self {
        Self::UnknownRegister { name: name.into() }
    }

    /// Create a read-only register error
    pub fn read_only<S: Into<String>>(name: S) -> Self {
        Self::ReadOnlyRegister { name: name.into() }
    }

    /// Create an unsupported firmware error
    pub fn unsupported_firmware<S: Into<String>>(version: S) -> Self {
        Self::UnsupportedFirmware { version: version.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is recoverable by reconnecting and retrying
    ///
    /// Transport failures and every protocol-level failure, including a
    /// device-reported status error, qualify. Data, configuration and
    /// exhausted-retry errors do not.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_thz::ThzError;
    ///
    /// assert!(ThzError::checksum_mismatch(0x12, 0x13).is_recoverable());
    /// assert!(!ThzError::unknown_register("flowTemp").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        self.is_transport_error() || self.is_protocol_error()
    }

    /// Check if the error is a transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a telegram protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::Frame { .. }
                | Self::ChecksumMismatch { .. }
                | Self::DeviceStatus { .. }
        )
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ThzError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The elapsed duration is unknown here; callers that know it build the
/// error with [`ThzError::timeout`] instead.
impl From<tokio::time::error::Elapsed> for ThzError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serial port errors
impl From<tokio_serial::Error> for ThzError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(format!("Serial port error: {}", err))
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ThzError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}
