//! Error types for fragmux-media.

use std::io;
use thiserror::Error;

/// Result type for fragmux-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fragmux-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 file structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required box in MP4 file.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Caller-supplied mux input is unusable.
    #[error("Invalid mux input: {0}")]
    InvalidInput(String),

    /// Byte-level read failure.
    #[error(transparent)]
    Buffer(#[from] fragmux_common::Error),

    /// NAL layer failure.
    #[error(transparent)]
    H264(#[from] fragmux_h264::Error),
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invalid mux input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
