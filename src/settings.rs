//! Camera settings for a capture session.
//!
//! Loaded from camelCase JSON. Every field has a default, so a settings file
//! only needs to name what it changes:
//!
//! ```json
//! { "frameRate": 60, "whiteBalance": { "temperature": 4800 } }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sampler::CoverageThresholds;

/// Frame rates the coverage thresholds were calibrated at.
pub const SUPPORTED_FRAME_RATES: [u32; 1] = [60];

/// Below this rate the pulse waveform is undersampled.
pub const MIN_FRAME_RATE: u32 = 12;

/// Fixed white balance gains, expressed as temperature and tint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhiteBalance {
    /// Color temperature in kelvin.
    pub temperature: f64,
    pub tint: f64,
}

impl Default for WhiteBalance {
    fn default() -> Self {
        Self {
            temperature: 5200.0,
            tint: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    /// Nominal frames per second.
    pub frame_rate: u32,
    /// Lens position in `[0, 1]`; 1.0 focuses furthest away.
    pub focus_lens_position: f64,
    /// Exposure time in seconds.
    pub exposure_duration: f64,
    pub iso: f64,
    pub white_balance: WhiteBalance,
    /// Lens-coverage calibration.
    pub coverage: CoverageThresholds,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            focus_lens_position: 1.0,
            exposure_duration: 1.0 / 120.0,
            iso: 60.0,
            white_balance: WhiteBalance::default(),
            coverage: CoverageThresholds::default(),
        }
    }
}

impl CameraSettings {
    /// Read settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        if !settings.is_supported_frame_rate() {
            tracing::warn!(
                frame_rate = settings.frame_rate,
                supported = ?SUPPORTED_FRAME_RATES,
                "Unsupported frame rate in settings"
            );
        }
        Ok(settings)
    }

    #[must_use]
    pub fn is_supported_frame_rate(&self) -> bool {
        self.frame_rate >= MIN_FRAME_RATE && SUPPORTED_FRAME_RATES.contains(&self.frame_rate)
    }
}
