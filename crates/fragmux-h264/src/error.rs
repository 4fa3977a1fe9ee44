//! Error types for fragmux-h264.

use thiserror::Error;

/// Result type for fragmux-h264 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for NAL and bitstream grammar operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream is structurally corrupt and cannot be parsed further.
    #[error("corrupt bitstream: {0}")]
    Corrupt(String),

    /// A recognized grammar branch this implementation does not handle.
    #[error("not implemented: {0}")]
    Unsupported(String),

    /// Bit- or byte-level read failure.
    #[error(transparent)]
    Bits(#[from] fragmux_common::Error),
}

impl Error {
    /// Create a corrupt bitstream error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create an unsupported grammar error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}
