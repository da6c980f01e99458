//! Core traits for persisting video frames.

use std::path::Path;

use crate::{CodecError, FormatDescription, MediaTime, VideoFrame};

/// Result of finalizing a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSummary {
    /// Number of frames written to the destination.
    pub frames_written: u64,
    /// Number of bytes written to the destination.
    pub bytes_written: u64,
}

/// A muxer that appends frames to one destination.
///
/// Writers are driven from a single thread: frames arrive in presentation
/// order and [`finish`](VideoWriter::finish) is called at most once.
pub trait VideoWriter: Send {
    /// Append one frame.
    ///
    /// Frames that do not match the format the writer was opened with are
    /// rejected with [`CodecError::FormatMismatch`].
    fn append(&mut self, frame: &VideoFrame) -> Result<(), CodecError>;

    /// Flush and close the destination, making it durable.
    fn finish(self: Box<Self>) -> Result<WriterSummary, CodecError>;
}

/// Opens [`VideoWriter`]s for recording spans.
pub trait WriterFactory: Send + Sync {
    /// Open a writer targeting `destination`.
    ///
    /// `start_time` is the media time the recording timeline begins at;
    /// `format` is the layout every appended frame must have.
    fn open(
        &self,
        destination: &Path,
        start_time: MediaTime,
        format: &FormatDescription,
    ) -> Result<Box<dyn VideoWriter>, CodecError>;
}
