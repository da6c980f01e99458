//! In-memory writer with injectable failures.
//!
//! Keeps the presentation times of every appended frame instead of pixel
//! data. Used to drive a recording sink without touching the filesystem.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    CodecError, FormatDescription, MediaTime, VideoFrame, VideoWriter, WriterFactory,
    WriterSummary,
};

/// What one writer received.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecording {
    pub destination: PathBuf,
    pub start_time: MediaTime,
    pub format: FormatDescription,
    /// Presentation time of each appended frame, in order.
    pub frames: Vec<MediaTime>,
    /// Set once `finish` succeeded.
    pub finished: bool,
}

/// Which operations should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailurePlan {
    /// Fail `open`.
    pub open: bool,
    /// Fail the append of the frame with this zero-based index.
    pub append_at: Option<usize>,
    /// Fail `finish`.
    pub finish: bool,
}

/// Opens [`MemoryWriter`]s and keeps every recording they produce.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriterFactory {
    recordings: Arc<Mutex<Vec<MemoryRecording>>>,
    open: Arc<OpenWriters>,
    failures: FailurePlan,
}

/// Writers currently alive, and the most ever alive at once.
#[derive(Debug, Default)]
struct OpenWriters {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryWriterFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose writers fail as described by `failures`.
    #[must_use]
    pub fn failing(failures: FailurePlan) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Snapshot of all recordings opened so far.
    #[must_use]
    pub fn recordings(&self) -> Vec<MemoryRecording> {
        self.recordings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most writers that were open at the same time.
    #[must_use]
    pub fn peak_open_writers(&self) -> usize {
        self.open.peak.load(Ordering::SeqCst)
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn open(
        &self,
        destination: &Path,
        start_time: MediaTime,
        format: &FormatDescription,
    ) -> Result<Box<dyn VideoWriter>, CodecError> {
        if self.failures.open {
            return Err(CodecError::generic(format!(
                "refusing to open {}",
                destination.display()
            )));
        }
        let mut recordings = self
            .recordings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        recordings.push(MemoryRecording {
            destination: destination.to_path_buf(),
            start_time,
            format: *format,
            frames: Vec::new(),
            finished: false,
        });
        let open = self.open.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.open.peak.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MemoryWriter {
            recordings: self.recordings.clone(),
            open: self.open.clone(),
            index: recordings.len() - 1,
            format: *format,
            failures: self.failures,
            bytes: 0,
        }))
    }
}

/// Writer half of [`MemoryWriterFactory`].
pub struct MemoryWriter {
    recordings: Arc<Mutex<Vec<MemoryRecording>>>,
    open: Arc<OpenWriters>,
    index: usize,
    format: FormatDescription,
    failures: FailurePlan,
    bytes: u64,
}

impl MemoryWriter {
    fn with_recording<T>(&self, f: impl FnOnce(&mut MemoryRecording) -> T) -> T {
        let mut recordings = self
            .recordings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut recordings[self.index])
    }
}

impl VideoWriter for MemoryWriter {
    fn append(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        if frame.format() != self.format {
            return Err(CodecError::FormatMismatch {
                expected: self.format,
                actual: frame.format(),
            });
        }
        let count = self.with_recording(|r| r.frames.len());
        if self.failures.append_at == Some(count) {
            return Err(CodecError::generic(format!("append {count} failed")));
        }
        self.bytes += frame.expected_data_size().unwrap_or(frame.data.len()) as u64;
        self.with_recording(|r| r.frames.push(frame.pts));
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<WriterSummary, CodecError> {
        if self.failures.finish {
            return Err(CodecError::generic("finish failed"));
        }
        let frames_written = self.with_recording(|r| {
            r.finished = true;
            r.frames.len() as u64
        });
        Ok(WriterSummary {
            frames_written,
            bytes_written: self.bytes,
        })
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.open.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;

    #[test]
    fn test_records_presentation_times() {
        let factory = MemoryWriterFactory::new();
        let format = FormatDescription::new(PixelFormat::Rgb, 2, 2);
        let mut writer = factory
            .open(Path::new("a.y4m"), MediaTime::ZERO, &format)
            .unwrap();
        for i in 0..3 {
            let frame = VideoFrame::solid(2, 2, PixelFormat::Rgb, [1, 2, 3], MediaTime::new(i, 60));
            writer.append(&frame).unwrap();
        }
        let summary = writer.finish().unwrap();
        assert_eq!(summary.frames_written, 3);
        assert_eq!(summary.bytes_written, 36);

        let recordings = factory.recordings();
        assert_eq!(recordings.len(), 1);
        assert!(recordings[0].finished);
        assert_eq!(recordings[0].frames[2], MediaTime::new(2, 60));
    }

    #[test]
    fn test_tracks_overlapping_writers() {
        let factory = MemoryWriterFactory::new();
        let format = FormatDescription::new(PixelFormat::Rgb, 1, 1);
        let first = factory.open(Path::new("a.y4m"), MediaTime::ZERO, &format).unwrap();
        first.finish().unwrap();
        let second = factory.open(Path::new("b.y4m"), MediaTime::ZERO, &format).unwrap();
        assert_eq!(factory.peak_open_writers(), 1);

        let third = factory.open(Path::new("c.y4m"), MediaTime::ZERO, &format).unwrap();
        assert_eq!(factory.peak_open_writers(), 2);
        drop((second, third));
    }

    #[test]
    fn test_injected_append_failure() {
        let factory = MemoryWriterFactory::failing(FailurePlan {
            append_at: Some(1),
            ..Default::default()
        });
        let format = FormatDescription::new(PixelFormat::Rgb, 1, 1);
        let mut writer = factory
            .open(Path::new("b.y4m"), MediaTime::ZERO, &format)
            .unwrap();
        let frame = VideoFrame::solid(1, 1, PixelFormat::Rgb, [0, 0, 0], MediaTime::ZERO);
        assert!(writer.append(&frame).is_ok());
        assert!(writer.append(&frame).is_err());
        assert_eq!(factory.recordings()[0].frames.len(), 1);
    }
}
