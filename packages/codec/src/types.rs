//! Core value types shared by the capture pipeline and the recording writers.

use std::fmt;

/// Pixel format for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel).
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel).
    Rgba,
    /// BGR with 8 bits per channel (24 bits per pixel).
    Bgr,
    /// BGRA with 8 bits per channel (32 bits per pixel).
    Bgra,
    /// ARGB with 8 bits per channel (32 bits per pixel).
    Argb,
    /// ABGR with 8 bits per channel (32 bits per pixel).
    Abgr,
    /// NV12 (YUV 4:2:0, planar Y + interleaved UV).
    Nv12,
    /// I420/YUV420P (YUV 4:2:0, planar Y + U + V).
    I420,
}

impl PixelFormat {
    /// Byte layout of a packed pixel as `(red, green, blue, stride)` offsets.
    ///
    /// Returns `None` for planar formats.
    #[must_use]
    pub fn packed_layout(&self) -> Option<(usize, usize, usize, usize)> {
        match self {
            Self::Rgb => Some((0, 1, 2, 3)),
            Self::Bgr => Some((2, 1, 0, 3)),
            Self::Rgba => Some((0, 1, 2, 4)),
            Self::Bgra => Some((2, 1, 0, 4)),
            Self::Argb => Some((1, 2, 3, 4)),
            Self::Abgr => Some((3, 2, 1, 4)),
            Self::Nv12 | Self::I420 => None,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Bgra
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
            Self::Bgr => "BGR",
            Self::Bgra => "BGRA",
            Self::Argb => "ARGB",
            Self::Abgr => "ABGR",
            Self::Nv12 => "NV12",
            Self::I420 => "I420",
        };
        f.write_str(name)
    }
}

/// A point on a media timeline, expressed as `value / timescale` seconds.
///
/// Capture stacks hand out presentation times in their own time base; this
/// type carries them untouched until they are mapped onto the process clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaTime {
    /// Tick count.
    pub value: i64,
    /// Ticks per second. Always positive for valid times.
    pub timescale: i32,
}

impl MediaTime {
    /// Nanosecond timescale used when converting from seconds.
    pub const NANOS: i32 = 1_000_000_000;

    /// The zero time on a nanosecond timescale.
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: Self::NANOS,
    };

    /// Create a media time from ticks and a timescale.
    #[must_use]
    pub fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// Create a media time from microseconds.
    #[must_use]
    pub fn from_micros(micros: u64) -> Self {
        Self {
            value: micros as i64,
            timescale: 1_000_000,
        }
    }

    /// Whether the timescale can be used for conversion.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    /// The time in seconds.
    #[must_use]
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Signed offset from `origin` in microseconds.
    #[must_use]
    pub fn micros_since(&self, origin: MediaTime) -> i64 {
        ((self.seconds() - origin.seconds()) * 1_000_000.0).round() as i64
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

/// The fields of a capture format that the pipeline inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatDescription {
    /// Pixel layout of every frame.
    pub pixel_format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl FormatDescription {
    /// Create a new format description.
    #[must_use]
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
        }
    }
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.pixel_format, self.width, self.height)
    }
}
