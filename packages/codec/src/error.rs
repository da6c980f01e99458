//! Error types for frame handling and recording writers.

use crate::{FormatDescription, PixelFormat};
use thiserror::Error;

/// Errors that can occur while validating, converting or writing frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid frame dimensions.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Pixel buffer is smaller than its format requires.
    #[error("{format} frame data too short: expected {expected} bytes, got {actual}")]
    DataSize {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    /// Frame does not match the format the writer was opened with.
    #[error("frame format {actual} does not match {expected}")]
    FormatMismatch {
        expected: FormatDescription,
        actual: FormatDescription,
    },

    /// Malformed container data.
    #[error("malformed stream: {0}")]
    Malformed(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic/unknown error.
    #[error("writer error: {0}")]
    Generic(String),
}

impl CodecError {
    /// Create a Malformed error with a message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a Generic error with a message.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }
}
