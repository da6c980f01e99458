//! ppgcam - camera photoplethysmography frame pipeline.
//!
//! Turns a live camera stream into a per-frame optical signal for heart-rate
//! analysis: mean color of the frame centre, spatial spread of red, whether a
//! fingertip covers the lens, all stamped on one monotonic clock. A
//! synchronized copy of the stream can be recorded at the same time.
//!
//! # Modules
//!
//! - [`sampler`] - channel statistics and lens-coverage classification
//! - [`clock`] - monotonic clocks and presentation-time synchronization
//! - [`recorder`] - recording sink with its own writer thread
//! - [`processor`] - frame ingest that ties the pieces together
//! - [`dispatch`] - callback queues and delegate delivery
//! - [`sample_log`] - JSON-lines sample log delegate
//! - [`settings`] - camera settings and calibration
//! - [`synthetic`] - simulated finger-over-lens source
//! - `camera` - V4L2 capture (feature `camera`)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ppgcam::{SampleLog, SerialQueue, VideoProcessor};
//!
//! let log = Arc::new(SampleLog::create("samples.jsonl", 60)?);
//! let queue = Arc::new(SerialQueue::new("ppg-callbacks")?);
//! let processor = VideoProcessor::new(&log, 60, queue)?;
//!
//! processor.start_recording("capture.y4m", first_pts, format);
//! for frame in frames {
//!     processor.append_frame(&frame);
//! }
//! processor.stop_recording_async().await;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "camera")]
pub mod camera;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod processor;
pub mod recorder;
pub mod sample;
pub mod sample_log;
pub mod sampler;
pub mod settings;
pub mod synthetic;

pub use clock::{Clock, ManualClock, MonotonicClock, TimestampSynchronizer};
pub use dispatch::{CallbackQueue, Dispatcher, ProcessorDelegate, SerialQueue, Task, TokioQueue};
pub use error::{ProcessorError, RecordingError, SampleError};
pub use processor::{ProcessorOptions, ProcessorStats, VideoProcessor};
pub use recorder::{RecordingSink, RecordingState};
pub use sample::PixelSample;
pub use sample_log::SampleLog;
pub use sampler::{ChannelStats, CoverageThresholds, PixelSampler};
pub use settings::CameraSettings;
pub use synthetic::SyntheticSource;

pub use ppgcam_codec as codec;
pub use ppgcam_codec::{FormatDescription, MediaTime, PixelFormat, VideoFrame};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
