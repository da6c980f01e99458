//! Error types reported by the processor.
//!
//! Nothing here is ever returned from [`VideoProcessor::append_frame`]; every
//! variant travels to the delegate's optional error channel instead.
//!
//! [`VideoProcessor::append_frame`]: crate::VideoProcessor::append_frame

use std::path::PathBuf;

use ppgcam_codec::{CodecError, FormatDescription};
use thiserror::Error;

use crate::recorder::RecordingState;

/// Failure to compute channel statistics for a frame.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The frame is empty or its data does not fit its declared format.
    #[error("malformed frame: {0}")]
    Malformed(#[from] CodecError),
}

/// Failures of the recording sink.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// `start_recording` was called while a recording is active.
    #[error("recording already {state}")]
    AlreadyActive { state: RecordingState },

    /// The writer could not be spawned.
    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The writer could not open the destination.
    #[error("failed to open {}: {source}", destination.display())]
    Open {
        destination: PathBuf,
        #[source]
        source: CodecError,
    },

    /// A frame did not match the recording's format description.
    #[error("frame format {actual} is incompatible with recording format {expected}")]
    IncompatibleFrame {
        expected: FormatDescription,
        actual: FormatDescription,
    },

    /// The writer failed to append a frame.
    #[error("failed to append frame: {0}")]
    Append(#[source] CodecError),

    /// Flushing or closing the destination failed.
    #[error("failed to finalize recording: {0}")]
    Finalize(#[source] CodecError),
}

/// Errors delivered through [`ProcessorDelegate::on_recording_error`].
///
/// [`ProcessorDelegate::on_recording_error`]: crate::ProcessorDelegate::on_recording_error
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The nominal frame rate must be positive.
    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(u32),

    /// The frame failed validation, or does not match the format locked by
    /// the first accepted frame, and was dropped.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[source] CodecError),

    /// Sampling failed; the frame may still have been recorded.
    #[error("sampling failed: {0}")]
    Sampling(#[from] SampleError),

    /// A presentation time went backwards and the output was clamped.
    #[error(
        "presentation time went backwards ({presentation:.6}s < {previous:.6}s), clamped to {clamped:.6}s"
    )]
    TimestampRegression {
        previous: f64,
        presentation: f64,
        clamped: f64,
    },

    /// The recording sink failed; sampling continues.
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

impl ProcessorError {
    /// Whether this error came from the recording sink.
    #[must_use]
    pub fn is_recording_error(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    /// Whether this error is informational only (the sample was still delivered).
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::TimestampRegression { .. })
    }
}
