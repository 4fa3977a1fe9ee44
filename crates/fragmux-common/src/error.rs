//! Error types for fragmux-common.

use std::io;
use thiserror::Error;

/// Result type for fragmux-common operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for buffer and bitstream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Byte-level read past the end of a buffer or container.
    #[error("buffer underflow: need {need} bytes at offset {offset}, have {have}")]
    BufferUnderflow {
        offset: usize,
        need: usize,
        have: usize,
    },

    /// Bit-level read past the end of the bitstream.
    #[error("bit underflow: need {need} bits, have {have}")]
    BitUnderflow { need: u64, have: u64 },

    /// Structurally invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Create an invalid data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}
