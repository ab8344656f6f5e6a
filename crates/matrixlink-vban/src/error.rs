//! VBAN client error types.

use thiserror::Error;

/// VBAN client error type.
#[derive(Debug, Error)]
pub enum VbanError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Socket closed")]
    SocketClosed,

    #[error("Invalid endpoint configuration: {0}")]
    InvalidEndpointConfig(String),

    #[error(transparent)]
    Preset(#[from] matrixlink_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for VBAN client operations.
pub type VbanResult<T> = Result<T, VbanError>;
