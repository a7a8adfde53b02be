//! Error types for the madVR client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use madvr_client::{Command, Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     session.send_command(Command::parse(["KeyPress", "MENU"])?).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connect | [`Error::Connect`], [`Error::ConnectTimeout`], [`Error::ConnectRefused`] |
//! | Connection | [`Error::ReadTimeout`], [`Error::WriteTimeout`], [`Error::ConnectionClosed`], [`Error::Protocol`] |
//! | Pool | [`Error::PoolExhausted`], [`Error::Timeout`] |
//! | Command | [`Error::UnknownCommand`], [`Error::InvalidArgument`], [`Error::CommandRejected`] |
//! | Power | [`Error::NoWakeCapability`], [`Error::InvalidMacAddress`], [`Error::DevicePoweringOn`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session options or builder input are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connect Errors
    // ========================================================================
    /// Device unreachable or the connect handshake failed.
    #[error("Connect to {addr} failed: {message}")]
    Connect {
        /// Target address.
        addr: String,
        /// Description of the failure.
        message: String,
    },

    /// TCP connect did not complete in time.
    #[error("Connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Target address.
        addr: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Device actively refused the TCP connection.
    #[error("Connection to {addr} refused")]
    ConnectRefused {
        /// Target address.
        addr: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No frame arrived within the read timeout.
    #[error("Read timed out after {timeout_ms}ms")]
    ReadTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A frame could not be written within the write timeout.
    #[error("Write timed out after {timeout_ms}ms")]
    WriteTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Peer reset the connection or reached EOF.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol violation (oversized frame, bad greeting, unexpected reply).
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// Configured hard cap on pooled connections reached.
    #[error("Connection pool exhausted ({max} connections in use)")]
    PoolExhausted {
        /// The configured cap.
        max: usize,
    },

    /// Operation timeout.
    ///
    /// Returned when waiting for a pool slot or a device probe exceeds its
    /// deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// Command verb is not part of the supported catalog.
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized verb.
        command: String,
    },

    /// Invalid command argument.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Device answered the command with `ERROR`.
    #[error("Command {command} rejected by device: {reply}")]
    CommandRejected {
        /// The rejected verb.
        command: String,
        /// Raw reply line.
        reply: String,
    },

    // ========================================================================
    // Power Errors
    // ========================================================================
    /// Power-on requested but no MAC address is known.
    #[error("No MAC address known; cannot send wake signal")]
    NoWakeCapability,

    /// MAC address string could not be parsed.
    #[error("Invalid MAC address: {input}")]
    InvalidMacAddress {
        /// The rejected input.
        input: String,
    },

    /// Command issued while a power-on is in progress.
    #[error("Device is powering on; command {command} rejected")]
    DevicePoweringOn {
        /// The rejected verb.
        command: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connect error.
    #[inline]
    pub fn connect(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Maps an IO error raised by `TcpStream::connect` to a connect error.
    pub fn from_connect_io(addr: impl Into<String>, err: &IoError) -> Self {
        let addr = addr.into();
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectRefused { addr },
            ErrorKind::TimedOut => Self::ConnectTimeout {
                addr,
                timeout_ms: 0,
            },
            _ => Self::Connect {
                addr,
                message: err.to_string(),
            },
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(addr: impl Into<String>, timeout_ms: u64) -> Self {
        Self::ConnectTimeout {
            addr: addr.into(),
            timeout_ms,
        }
    }

    /// Creates a read timeout error.
    #[inline]
    pub fn read_timeout(timeout_ms: u64) -> Self {
        Self::ReadTimeout { timeout_ms }
    }

    /// Creates a write timeout error.
    #[inline]
    pub fn write_timeout(timeout_ms: u64) -> Self {
        Self::WriteTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a command rejected error.
    #[inline]
    pub fn command_rejected(command: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::CommandRejected {
            command: command.into(),
            reply: reply.into(),
        }
    }

    /// Creates an invalid MAC address error.
    #[inline]
    pub fn invalid_mac(input: impl Into<String>) -> Self {
        Self::InvalidMacAddress {
            input: input.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ReadTimeout { .. }
                | Self::WriteTimeout { .. }
                | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this error came from establishing a connection.
    #[inline]
    #[must_use]
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ConnectTimeout { .. } | Self::ConnectRefused { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        self.is_connect_error() || self.invalidates_connection()
    }

    /// Returns `true` if the connection that produced this error must be
    /// closed and never reused.
    ///
    /// The protocol has no mid-stream resynchronization, so any timeout,
    /// closure or framing violation leaves the socket in an unknown state.
    #[inline]
    #[must_use]
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::ReadTimeout { .. }
                | Self::WriteTimeout { .. }
                | Self::ConnectionClosed
                | Self::Protocol { .. }
                | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ReadTimeout { .. }
                | Self::WriteTimeout { .. }
                | Self::Timeout { .. }
                | Self::ConnectionClosed
                | Self::PoolExhausted { .. }
                | Self::DevicePoweringOn { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
