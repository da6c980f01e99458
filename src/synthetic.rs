//! Simulated fingertip-over-lens source.
//!
//! Produces BGRA frames whose red level pulses at a chosen heart rate, with
//! seeded per-pixel noise. Used when no camera is attached.

use std::f64::consts::TAU;

use ppgcam_codec::{FormatDescription, MediaTime, PixelFormat, VideoFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Peak deviation of the red channel from its base level.
const PULSE_AMPLITUDE: f64 = 6.0;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_rate: u32,
    heart_rate_bpm: f64,
    covered: bool,
    noise: i32,
    index: i64,
    rng: StdRng,
}

impl SyntheticSource {
    /// A covered lens at 72 bpm.
    #[must_use]
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate: frame_rate.max(1),
            heart_rate_bpm: 72.0,
            covered: true,
            noise: 2,
            index: 0,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    #[must_use]
    pub fn with_heart_rate(mut self, bpm: f64) -> Self {
        self.heart_rate_bpm = bpm;
        self
    }

    /// Maximum per-pixel noise, in 8-bit levels.
    #[must_use]
    pub fn with_noise(mut self, noise: u8) -> Self {
        self.noise = i32::from(noise);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Simulate lifting the finger off the lens, or putting it back.
    pub fn set_covered(&mut self, covered: bool) {
        self.covered = covered;
    }

    #[must_use]
    pub fn format(&self) -> FormatDescription {
        FormatDescription::new(PixelFormat::Bgra, self.width, self.height)
    }

    /// Presentation time of the next frame.
    #[must_use]
    pub fn next_pts(&self) -> MediaTime {
        MediaTime::new(self.index, i32::try_from(self.frame_rate).unwrap_or(i32::MAX))
    }

    /// Channel levels of frame `index` before noise, as `[r, g, b]`.
    fn base_color(&self, index: i64) -> [f64; 3] {
        if !self.covered {
            return [118.0, 112.0, 104.0];
        }
        let t = index as f64 / f64::from(self.frame_rate);
        let phase = TAU * self.heart_rate_bpm / 60.0 * t;
        [180.0 + PULSE_AMPLITUDE * phase.sin(), 28.0, 18.0]
    }

    pub fn next_frame(&mut self) -> VideoFrame {
        let pts = self.next_pts();
        let [r, g, b] = self.base_color(self.index);
        self.index += 1;

        let pixels = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            let n = if self.noise > 0 {
                self.rng.random_range(-self.noise..=self.noise)
            } else {
                0
            };
            data.push(jitter(b, n));
            data.push(jitter(g, n));
            data.push(jitter(r, n));
            data.push(255);
        }
        VideoFrame::from_bgra(self.width, self.height, data, pts)
    }
}

fn jitter(level: f64, noise: i32) -> u8 {
    (level.round() as i32 + noise).clamp(0, 255) as u8
}

impl Iterator for SyntheticSource {
    type Item = VideoFrame;

    fn next(&mut self) -> Option<VideoFrame> {
        Some(self.next_frame())
    }
}
