//! Monotonic clocks and presentation-time synchronization.
//!
//! Capture stacks stamp frames in their own media time base. Downstream
//! signal analysis wants every sample on one process-wide monotonic clock, so
//! the [`TimestampSynchronizer`] anchors the first frame's presentation time
//! to the current uptime and carries later frames over by their media-time
//! offset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use ppgcam_codec::MediaTime;

/// Smallest step the synchronizer advances by when clamping a regression.
pub const MIN_TIMESTAMP_STEP: f64 = 1e-6;

/// A monotonic time source, in seconds.
pub trait Clock: Send + Sync {
    /// Seconds since the clock's origin. Never decreases.
    fn uptime(&self) -> f64;
}

/// Process uptime, measured from the first time any `MonotonicClock` is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn uptime(&self) -> f64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `seconds`.
    #[must_use]
    pub fn new(seconds: f64) -> Self {
        Self {
            micros: AtomicU64::new((seconds * 1_000_000.0).round() as u64),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: f64) {
        self.micros
            .fetch_add((seconds * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn uptime(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

/// Output of [`TimestampSynchronizer::synchronize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncedTime {
    /// Timestamp on the monotonic clock.
    pub timestamp: f64,
    /// Set when the raw mapping went backwards and `timestamp` was clamped;
    /// holds the `(previous, unclamped)` pair.
    pub regression: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    start_uptime: f64,
    first_pts: f64,
}

/// Maps media presentation times onto a monotonic clock.
pub struct TimestampSynchronizer {
    clock: Arc<dyn Clock>,
    anchor: Option<Anchor>,
    last: Option<f64>,
}

impl TimestampSynchronizer {
    /// Create a synchronizer reading `clock` on its first frame.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            anchor: None,
            last: None,
        }
    }

    /// Uptime recorded at the first synchronized frame.
    #[must_use]
    pub fn start_uptime(&self) -> Option<f64> {
        self.anchor.map(|a| a.start_uptime)
    }

    /// Map one presentation time.
    ///
    /// The first call anchors the session; later calls return
    /// `start_uptime + (pts - first_pts)`, clamped so outputs never decrease.
    pub fn synchronize(&mut self, pts: MediaTime) -> SyncedTime {
        let pts = pts.seconds();
        let anchor = *self.anchor.get_or_insert_with(|| Anchor {
            start_uptime: self.clock.uptime(),
            first_pts: pts,
        });

        let raw = anchor.start_uptime + (pts - anchor.first_pts);
        let synced = match self.last {
            Some(previous) if raw < previous => SyncedTime {
                timestamp: previous + MIN_TIMESTAMP_STEP,
                regression: Some((previous, raw)),
            },
            _ => SyncedTime {
                timestamp: raw,
                regression: None,
            },
        };
        self.last = Some(synced.timestamp);
        synced
    }
}
