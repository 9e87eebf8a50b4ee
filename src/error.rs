//! # Error Types
//!
//! Custom error types for SN Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for SN Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// SN protocol errors (malformed frames built or parsed explicitly)
    #[error("SN protocol error: {0}")]
    Protocol(String),

    /// Checksum range outside the supplied buffer
    #[error("Invalid range {start}..{end} for buffer of {len} bytes")]
    InvalidRange {
        start: usize,
        end: usize,
        len: usize,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// UDP peer could not be resolved to a socket address
    #[error("Unable to resolve UDP endpoint {0}")]
    AddressResolution(String),

    /// No tokio runtime available to run background tasks
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Transport was closed and accepts no further connects
    #[error("UDP transport is closed")]
    TransportClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for SN Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
