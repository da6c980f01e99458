//! Frame ingest: the entry point the capture stack feeds.
//!
//! Every frame runs through the same steps on the caller's thread:
//!
//! 1. validate the frame and check it against the session format
//! 2. map its presentation time onto the monotonic clock
//! 3. sample the central region and queue a [`PixelSample`] for the delegate
//! 4. hand it to the recording sink if a recording is armed
//!
//! None of these steps wait on the delegate or on disk.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ppgcam_codec::y4m::Y4mWriterFactory;
use ppgcam_codec::{CodecError, FormatDescription, MediaTime, VideoFrame, WriterFactory, WriterSummary};

use crate::clock::{Clock, MonotonicClock, TimestampSynchronizer};
use crate::dispatch::{CallbackQueue, Dispatcher, ProcessorDelegate};
use crate::error::ProcessorError;
use crate::lock;
use crate::recorder::{RecordingSink, RecordingState};
use crate::sample::PixelSample;
use crate::sampler::{CoverageThresholds, PixelSampler};
use crate::settings::{MIN_FRAME_RATE, SUPPORTED_FRAME_RATES};

/// Optional collaborators for [`VideoProcessor::with_options`].
#[derive(Clone)]
pub struct ProcessorOptions {
    /// Clock the first frame is anchored to.
    pub clock: Arc<dyn Clock>,
    /// Lens-coverage calibration.
    pub thresholds: CoverageThresholds,
    /// Writer used for recordings. Defaults to Y4M at the session frame rate.
    pub writer_factory: Option<Arc<dyn WriterFactory>>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock),
            thresholds: CoverageThresholds::default(),
            writer_factory: None,
        }
    }
}

/// Frame counters since the processor was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Frames passed to `append_frame`.
    pub frames_received: u64,
    /// Frames that produced a sample.
    pub frames_processed: u64,
    /// Frames rejected before sampling.
    pub frames_dropped: u64,
    /// Frames handed to the recording sink.
    pub frames_recorded: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    recorded: AtomicU64,
}

struct Ingest {
    sync: TimestampSynchronizer,
    session_format: Option<FormatDescription>,
    last_pts: Option<MediaTime>,
}

/// One capture session: turns frames into samples and optionally records them.
///
/// Lock order is ingest, then sink. Delegate callbacks never run under
/// either, so they may start or stop recordings.
pub struct VideoProcessor {
    frame_rate: u32,
    sampler: PixelSampler,
    ingest: Mutex<Ingest>,
    sink: RecordingSink,
    dispatcher: Dispatcher,
    counters: Counters,
}

impl VideoProcessor {
    /// Create a processor with the default clock, thresholds and writer.
    pub fn new<D>(
        delegate: &Arc<D>,
        frame_rate: u32,
        queue: Arc<dyn CallbackQueue>,
    ) -> Result<Self, ProcessorError>
    where
        D: ProcessorDelegate + 'static,
    {
        Self::with_options(delegate, frame_rate, queue, ProcessorOptions::default())
    }

    pub fn with_options<D>(
        delegate: &Arc<D>,
        frame_rate: u32,
        queue: Arc<dyn CallbackQueue>,
        options: ProcessorOptions,
    ) -> Result<Self, ProcessorError>
    where
        D: ProcessorDelegate + 'static,
    {
        if frame_rate == 0 {
            return Err(ProcessorError::InvalidFrameRate(frame_rate));
        }
        if frame_rate < MIN_FRAME_RATE || !SUPPORTED_FRAME_RATES.contains(&frame_rate) {
            tracing::warn!(
                frame_rate,
                supported = ?SUPPORTED_FRAME_RATES,
                "Frame rate is not supported, samples may be unreliable"
            );
        }

        let weak: Weak<dyn ProcessorDelegate> = Arc::downgrade(delegate) as Weak<dyn ProcessorDelegate>;
        let dispatcher = Dispatcher::new(weak, queue);
        let factory = options
            .writer_factory
            .unwrap_or_else(|| Arc::new(Y4mWriterFactory::new(frame_rate)));

        tracing::debug!(frame_rate, "Video processor created");
        Ok(Self {
            frame_rate,
            sampler: PixelSampler::new(options.thresholds),
            ingest: Mutex::new(Ingest {
                sync: TimestampSynchronizer::new(options.clock),
                session_format: None,
                last_pts: None,
            }),
            sink: RecordingSink::new(factory, dispatcher.clone()),
            dispatcher,
            counters: Counters::default(),
        })
    }

    #[must_use]
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Monotonic uptime at the first processed frame, once there is one.
    #[must_use]
    pub fn start_system_uptime(&self) -> Option<f64> {
        lock(&self.ingest).sync.start_uptime()
    }

    /// Destination of the current or most recent recording.
    #[must_use]
    pub fn destination(&self) -> Option<PathBuf> {
        self.sink.destination()
    }

    #[must_use]
    pub fn recording_state(&self) -> RecordingState {
        self.sink.state()
    }

    /// Summary of the most recent successfully finalized recording.
    #[must_use]
    pub fn last_recording(&self) -> Option<WriterSummary> {
        self.sink.last_recording()
    }

    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            frames_received: self.counters.received.load(Ordering::Relaxed),
            frames_processed: self.counters.processed.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            frames_recorded: self.counters.recorded.load(Ordering::Relaxed),
        }
    }

    /// Arm recording to `destination`. Failures go to the delegate.
    pub fn start_recording(
        &self,
        destination: impl Into<PathBuf>,
        start_time: MediaTime,
        format: FormatDescription,
    ) {
        self.sink.start(destination.into(), start_time, format);
    }

    /// Stop recording. `completion` runs once on the callback queue after
    /// the file is closed, or promptly if nothing was recording.
    pub fn stop_recording<F>(&self, completion: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.sink.stop(Box::new(completion));
    }

    /// Future form of [`stop_recording`](Self::stop_recording).
    pub fn stop_recording_async(&self) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.stop_recording(move || {
            let _ = tx.send(());
        });
        async move {
            // A dropped sender means the queue shut down; either way we're done
            let _ = rx.await;
        }
    }

    /// Process one frame from the capture stack.
    pub fn append_frame(&self, frame: &VideoFrame) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = validate(frame) {
            self.drop_frame(e);
            return;
        }

        let mut ingest = lock(&self.ingest);
        let actual = frame.format();
        let session_format = ingest.session_format;
        match session_format {
            Some(expected) if expected != actual => {
                drop(ingest);
                self.drop_frame(CodecError::FormatMismatch { expected, actual });
                return;
            }
            Some(_) => {}
            None => {
                tracing::debug!(format = %actual, "Session format locked");
                ingest.session_format = Some(actual);
            }
        }

        self.check_cadence(&mut ingest, frame.pts);
        let synced = ingest.sync.synchronize(frame.pts);
        if let Some((previous, presentation)) = synced.regression {
            self.dispatcher
                .deliver_error(ProcessorError::TimestampRegression {
                    previous,
                    presentation,
                    clamped: synced.timestamp,
                });
        }

        match self.sampler.sample(frame) {
            Ok(stats) => {
                self.dispatcher.deliver(PixelSample {
                    presentation_timestamp: synced.timestamp,
                    red: stats.red,
                    green: stats.green,
                    blue: stats.blue,
                    red_sd: stats.red_sd,
                    is_covering_lens: stats.is_covering_lens,
                });
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.dispatcher.deliver_error(e.into()),
        }

        if self.sink.append(frame) {
            self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn drop_frame(&self, error: CodecError) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        self.dispatcher
            .deliver_error(ProcessorError::InvalidFrame(error));
    }

    fn check_cadence(&self, ingest: &mut Ingest, pts: MediaTime) {
        if let Some(last) = ingest.last_pts.replace(pts) {
            let gap = pts.seconds() - last.seconds();
            let nominal = 1.0 / f64::from(self.frame_rate);
            if gap > 2.0 * nominal {
                tracing::warn!(
                    gap_ms = gap * 1000.0,
                    expected_ms = nominal * 1000.0,
                    "Frame gap exceeds twice the nominal interval, frames were likely dropped"
                );
            }
        }
    }
}

fn validate(frame: &VideoFrame) -> Result<(), CodecError> {
    frame.validate()?;
    if !frame.pts.is_valid() {
        return Err(CodecError::malformed(format!(
            "presentation time {} has no usable timescale",
            frame.pts
        )));
    }
    Ok(())
}
