use serde::{Deserialize, Serialize};

/// Color statistics for one processed frame.
///
/// Channel values are on the 0–255 scale. Serialized field names match the
/// sample log format (`timestamp`, `red`, `green`, `blue`, `redSD`,
/// `isCoveringLens`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelSample {
    /// Seconds on the process-monotonic clock.
    #[serde(rename = "timestamp")]
    pub presentation_timestamp: f64,
    /// Mean red intensity over the sampled region.
    pub red: f64,
    /// Mean green intensity over the sampled region.
    pub green: f64,
    /// Mean blue intensity over the sampled region.
    pub blue: f64,
    /// Standard deviation of red over the sampled region.
    #[serde(rename = "redSD")]
    pub red_sd: f64,
    /// Whether a finger appears to cover the lens.
    pub is_covering_lens: bool,
}
