//! Per-frame channel statistics and lens-coverage classification.
//!
//! The sampler reads a central sub-rectangle of each frame (the lens housing
//! tends to bleed into the edges), averages each channel, measures the
//! spatial spread of red and decides whether a fingertip is over the lens.

use ppgcam_codec::VideoFrame;
use serde::{Deserialize, Serialize};

use crate::error::SampleError;

/// Fraction trimmed from each side of the frame before sampling.
pub const DEFAULT_MARGIN: f64 = 0.1;

/// Calibration for [`CoverageThresholds::is_covering_lens`].
///
/// A fingertip pressed over a lit lens saturates red and dims everything
/// else; these limits describe how strongly that has to show.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverageThresholds {
    /// Lowest mean red level.
    pub min_red: f64,
    /// Hue upper bound in degrees for the low end of the red zone.
    pub max_hue: f64,
    /// Hue lower bound in degrees for the wrapped end of the red zone.
    pub min_wrapped_hue: f64,
    /// Lowest saturation (`(max - min) / max`).
    pub min_saturation: f64,
    /// Highest spatial standard deviation of red.
    pub max_red_sd: f64,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            min_red: 60.0,
            max_hue: 30.0,
            min_wrapped_hue: 350.0,
            min_saturation: 0.7,
            max_red_sd: 50.0,
        }
    }
}

impl CoverageThresholds {
    /// Classify one set of channel means.
    #[must_use]
    pub fn is_covering_lens(&self, red: f64, green: f64, blue: f64, red_sd: f64) -> bool {
        if red < self.min_red || red <= green || red <= blue || red_sd > self.max_red_sd {
            return false;
        }

        // red is the max channel here
        let min = green.min(blue);
        let delta = red - min;
        let mut hue = 60.0 * (green - blue) / delta;
        if hue < 0.0 {
            hue += 360.0;
        }
        let saturation = delta / red;

        (hue <= self.max_hue || hue >= self.min_wrapped_hue) && saturation >= self.min_saturation
    }
}

/// Statistics for one frame, before a timestamp is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub red_sd: f64,
    pub is_covering_lens: bool,
}

/// Computes [`ChannelStats`] over the central region of a frame.
#[derive(Debug, Clone, Copy)]
pub struct PixelSampler {
    margin: f64,
    thresholds: CoverageThresholds,
}

impl Default for PixelSampler {
    fn default() -> Self {
        Self::new(CoverageThresholds::default())
    }
}

impl PixelSampler {
    /// Create a sampler with the default margin.
    #[must_use]
    pub fn new(thresholds: CoverageThresholds) -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            thresholds,
        }
    }

    /// Use a different edge margin, clamped to `[0, 0.49]`.
    #[must_use]
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin.clamp(0.0, 0.49);
        self
    }

    #[must_use]
    pub fn thresholds(&self) -> &CoverageThresholds {
        &self.thresholds
    }

    /// Sample one frame.
    pub fn sample(&self, frame: &VideoFrame) -> Result<ChannelStats, SampleError> {
        frame.validate()?;

        let (x0, x1) = central_span(frame.width as usize, self.margin);
        let (y0, y1) = central_span(frame.height as usize, self.margin);

        let mut sum = [0u64; 3];
        let mut red_sq: u128 = 0;
        for y in y0..y1 {
            for x in x0..x1 {
                let (r, g, b) = frame.rgb_at(x, y);
                sum[0] += u64::from(r);
                sum[1] += u64::from(g);
                sum[2] += u64::from(b);
                red_sq += u128::from(r) * u128::from(r);
            }
        }

        let n = ((x1 - x0) * (y1 - y0)) as u128;
        let nf = n as f64;
        // n·Σx² − (Σx)² is exact in integers, so uniform frames give exactly 0.
        let red_sum = u128::from(sum[0]);
        let spread = (n * red_sq).saturating_sub(red_sum * red_sum);
        let red_sd = (spread as f64).sqrt() / nf;

        let red = sum[0] as f64 / nf;
        let green = sum[1] as f64 / nf;
        let blue = sum[2] as f64 / nf;

        Ok(ChannelStats {
            red,
            green,
            blue,
            red_sd,
            is_covering_lens: self.thresholds.is_covering_lens(red, green, blue, red_sd),
        })
    }
}

/// Half-open index range left after trimming `margin` from both ends.
fn central_span(len: usize, margin: f64) -> (usize, usize) {
    let trim = (len as f64 * margin).floor() as usize;
    if len <= 2 * trim {
        let mid = len / 2;
        return (mid, mid + 1);
    }
    (trim, len - trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppgcam_codec::{MediaTime, PixelFormat};

    fn solid(format: PixelFormat, rgb: [u8; 3]) -> VideoFrame {
        VideoFrame::solid(32, 24, format, rgb, MediaTime::ZERO)
    }

    #[test]
    fn test_uniform_frame_has_zero_spread() {
        let sampler = PixelSampler::default();
        for format in [
            PixelFormat::Rgb,
            PixelFormat::Rgba,
            PixelFormat::Bgr,
            PixelFormat::Bgra,
            PixelFormat::Argb,
            PixelFormat::Abgr,
        ] {
            let stats = sampler.sample(&solid(format, [120, 120, 120])).unwrap();
            assert_eq!(stats.red, 120.0, "{format}");
            assert_eq!(stats.green, 120.0, "{format}");
            assert_eq!(stats.blue, 120.0, "{format}");
            assert_eq!(stats.red_sd, 0.0, "{format}");
            assert!(!stats.is_covering_lens);
        }
    }

    #[test]
    fn test_channel_order_is_respected() {
        let sampler = PixelSampler::default();
        let stats = sampler.sample(&solid(PixelFormat::Bgra, [200, 30, 10])).unwrap();
        assert_eq!((stats.red, stats.green, stats.blue), (200.0, 30.0, 10.0));
        assert!(stats.is_covering_lens);
    }

    #[test]
    fn test_planar_formats_are_close() {
        let sampler = PixelSampler::default();
        for format in [PixelFormat::Nv12, PixelFormat::I420] {
            let stats = sampler.sample(&solid(format, [190, 40, 20])).unwrap();
            assert!((stats.red - 190.0).abs() < 4.0, "{format}: {stats:?}");
            assert!((stats.green - 40.0).abs() < 4.0, "{format}: {stats:?}");
            assert!((stats.blue - 20.0).abs() < 4.0, "{format}: {stats:?}");
            assert!(stats.is_covering_lens);
        }
    }

    #[test]
    fn test_edges_are_ignored() {
        // Bright border, dark centre
        let (w, h) = (20u32, 20u32);
        let mut data = vec![0u8; (w * h * 3) as usize];
        for y in 0..h as usize {
            for x in 0..w as usize {
                let edge = x < 2 || y < 2 || x >= 18 || y >= 18;
                let value = if edge { 255 } else { 10 };
                let idx = (y * w as usize + x) * 3;
                data[idx..idx + 3].copy_from_slice(&[value, value, value]);
            }
        }
        let frame = VideoFrame::from_rgb(w, h, data, MediaTime::ZERO);
        let stats = PixelSampler::default().sample(&frame).unwrap();
        assert_eq!(stats.red, 10.0);
        assert_eq!(stats.red_sd, 0.0);
    }

    #[test]
    fn test_red_spread() {
        // Alternating 100/200 columns: population sd is 50
        let (w, h) = (10u32, 10u32);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for _y in 0..h {
            for x in 0..w {
                let r = if x % 2 == 0 { 100 } else { 200 };
                data.extend_from_slice(&[r, 0, 0]);
            }
        }
        let frame = VideoFrame::from_rgb(w, h, data, MediaTime::ZERO);
        let stats = PixelSampler::default().with_margin(0.0).sample(&frame).unwrap();
        assert_eq!(stats.red, 150.0);
        assert!((stats.red_sd - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_pixel_frame() {
        let frame = VideoFrame::solid(1, 1, PixelFormat::Rgb, [80, 5, 5], MediaTime::ZERO);
        let stats = PixelSampler::default().sample(&frame).unwrap();
        assert_eq!(stats.red, 80.0);
        assert!(stats.is_covering_lens);
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        let sampler = PixelSampler::default();
        let empty = VideoFrame::from_rgb(0, 0, Vec::new(), MediaTime::ZERO);
        assert!(sampler.sample(&empty).is_err());

        let short = VideoFrame::from_bgra(4, 4, vec![0; 10], MediaTime::ZERO);
        assert!(matches!(sampler.sample(&short), Err(SampleError::Malformed(_))));
    }

    #[test]
    fn test_coverage_thresholds() {
        let t = CoverageThresholds::default();
        assert!(t.is_covering_lens(200.0, 20.0, 10.0, 2.0));
        // Hue wraps: slightly more blue than green
        assert!(t.is_covering_lens(200.0, 10.0, 20.0, 2.0));
        // Too dark
        assert!(!t.is_covering_lens(50.0, 5.0, 5.0, 2.0));
        // Orange: hue ~ 45 degrees
        assert!(!t.is_covering_lens(200.0, 150.0, 0.0, 2.0));
        // Washed out
        assert!(!t.is_covering_lens(200.0, 120.0, 110.0, 2.0));
        // Red not dominant
        assert!(!t.is_covering_lens(100.0, 100.0, 10.0, 2.0));
        // Textured scene
        assert!(!t.is_covering_lens(200.0, 20.0, 10.0, 80.0));
    }

    #[test]
    fn test_classification_is_repeatable() {
        let sampler = PixelSampler::default();
        let frame = solid(PixelFormat::Rgb, [160, 30, 25]);
        let a = sampler.sample(&frame).unwrap();
        let b = sampler.sample(&frame.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_thresholds_deserialize_with_defaults() {
        let t: CoverageThresholds = serde_json::from_str(r#"{"minRed": 90}"#).unwrap();
        assert_eq!(t.min_red, 90.0);
        assert_eq!(t.max_red_sd, 50.0);
    }
}
