//! Video frame type, pixel access and conversions.

use crate::{CodecError, FormatDescription, MediaTime, PixelFormat};

/// A decoded video frame with pixel data.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the frame data.
    pub pixel_format: PixelFormat,
    /// Raw pixel data, tightly packed (no row padding).
    pub data: Vec<u8>,
    /// Presentation time in the capture stack's time base.
    pub pts: MediaTime,
}

impl VideoFrame {
    /// Create a new video frame.
    #[must_use]
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
        pts: MediaTime,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
            pts,
        }
    }

    /// Create a frame from RGB data.
    #[must_use]
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, pts: MediaTime) -> Self {
        Self::new(width, height, PixelFormat::Rgb, data, pts)
    }

    /// Create a frame from BGRA data.
    #[must_use]
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>, pts: MediaTime) -> Self {
        Self::new(width, height, PixelFormat::Bgra, data, pts)
    }

    /// Create a frame of one solid color in the given format.
    #[must_use]
    pub fn solid(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        rgb: [u8; 3],
        pts: MediaTime,
    ) -> Self {
        let pixels = width as usize * height as usize;
        let data = match pixel_format.packed_layout() {
            Some((r, g, b, stride)) => {
                let mut px = vec![255u8; stride];
                px[r] = rgb[0];
                px[g] = rgb[1];
                px[b] = rgb[2];
                px.repeat(pixels)
            }
            None => {
                let (y, u, v) = rgb_to_yuv(rgb[0] as i32, rgb[1] as i32, rgb[2] as i32);
                let (cw, ch) = chroma_size(width, height);
                let chroma = cw * ch;
                let mut data = vec![y; pixels];
                match pixel_format {
                    PixelFormat::Nv12 => data.extend([u, v].repeat(chroma)),
                    _ => {
                        data.extend(std::iter::repeat(u).take(chroma));
                        data.extend(std::iter::repeat(v).take(chroma));
                    }
                }
                data
            }
        };
        Self::new(width, height, pixel_format, data, pts)
    }

    /// The format description of this frame.
    #[must_use]
    pub fn format(&self) -> FormatDescription {
        FormatDescription::new(self.pixel_format, self.width, self.height)
    }

    /// Expected data size for the current dimensions and pixel format.
    ///
    /// `None` when the size does not fit in memory.
    #[must_use]
    pub fn expected_data_size(&self) -> Option<usize> {
        expected_frame_size(self.width, self.height, self.pixel_format)
    }

    /// Check that the frame is non-empty and carries enough pixel data.
    pub fn validate(&self) -> Result<(), CodecError> {
        self.checked_data_size().map(|_| ())
    }

    /// Validate and return the number of bytes the pixel data occupies.
    fn checked_data_size(&self) -> Result<usize, CodecError> {
        let invalid = CodecError::InvalidDimensions {
            width: self.width,
            height: self.height,
        };
        if self.width == 0 || self.height == 0 {
            return Err(invalid);
        }
        let Some(expected) = self.expected_data_size() else {
            return Err(invalid);
        };
        if self.data.len() < expected {
            return Err(CodecError::DataSize {
                format: self.pixel_format,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(expected)
    }

    /// Read the pixel at (`x`, `y`) as 8-bit RGB.
    ///
    /// The frame must have passed [`validate`](Self::validate) and the
    /// coordinates must be in bounds.
    #[must_use]
    pub fn rgb_at(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let w = self.width as usize;
        let h = self.height as usize;
        if let Some((r, g, b, stride)) = self.pixel_format.packed_layout() {
            let idx = (y * w + x) * stride;
            return (self.data[idx + r], self.data[idx + g], self.data[idx + b]);
        }

        let (cw, ch) = chroma_size(self.width, self.height);
        let luma = self.data[y * w + x];
        let (u, v) = match self.pixel_format {
            PixelFormat::Nv12 => {
                let idx = w * h + (y / 2) * cw * 2 + (x / 2) * 2;
                (self.data[idx], self.data[idx + 1])
            }
            _ => {
                let u_offset = w * h;
                let v_offset = u_offset + cw * ch;
                let idx = (y / 2) * cw + x / 2;
                (self.data[u_offset + idx], self.data[v_offset + idx])
            }
        };
        yuv_to_rgb(luma, u, v)
    }

    /// Convert this frame to I420 pixel data.
    ///
    /// If the frame is already I420, returns a copy of its data.
    pub fn to_i420(&self) -> Result<Vec<u8>, CodecError> {
        let size = self.checked_data_size()?;
        match self.pixel_format {
            PixelFormat::I420 => Ok(self.data[..size].to_vec()),
            PixelFormat::Nv12 => Ok(nv12_to_i420(&self.data, self.width, self.height)),
            _ => Ok(packed_to_i420(self)),
        }
    }
}

/// Calculate the expected frame size for given dimensions and format.
///
/// Returns `None` if the size overflows `usize`.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
    let pixels = (width as usize).checked_mul(height as usize)?;
    match format {
        PixelFormat::Rgb | PixelFormat::Bgr => pixels.checked_mul(3),
        PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Abgr => {
            pixels.checked_mul(4)
        }
        PixelFormat::Nv12 | PixelFormat::I420 => {
            let (cw, ch) = chroma_size(width, height);
            // Y + UV (4:2:0)
            cw.checked_mul(ch)?.checked_mul(2)?.checked_add(pixels)
        }
    }
}

/// Dimensions of one 4:2:0 chroma plane (rounded up for odd sizes).
fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

// ============================================================================
// Color conversion functions
// ============================================================================

/// BT.601 limited-range RGB to YUV.
fn rgb_to_yuv(r: i32, g: i32, b: i32) -> (u8, u8, u8) {
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

/// BT.601 limited-range YUV to RGB.
#[must_use]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;

    let r = (1.164 * c + 1.596 * e).round().clamp(0.0, 255.0) as u8;
    let g = (1.164 * c - 0.392 * d - 0.813 * e).round().clamp(0.0, 255.0) as u8;
    let b = (1.164 * c + 2.017 * d).round().clamp(0.0, 255.0) as u8;
    (r, g, b)
}

/// Convert any packed RGB-family frame to I420.
fn packed_to_i420(frame: &VideoFrame) -> Vec<u8> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let (cw, ch) = chroma_size(frame.width, frame.height);
    let y_size = w * h;
    let mut i420 = vec![0u8; y_size + cw * ch * 2];

    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = frame.rgb_at(x, y);
            let (luma, _, _) = rgb_to_yuv(r as i32, g as i32, b as i32);
            i420[y * w + x] = luma;
        }
    }

    // Chroma subsampled 2x2, edge pixels repeated for odd sizes
    let u_offset = y_size;
    let v_offset = u_offset + cw * ch;
    for cy in 0..ch {
        for cx in 0..cw {
            let mut r_sum = 0i32;
            let mut g_sum = 0i32;
            let mut b_sum = 0i32;

            for dy in 0..2 {
                for dx in 0..2 {
                    let py = (cy * 2 + dy).min(h - 1);
                    let px = (cx * 2 + dx).min(w - 1);
                    let (r, g, b) = frame.rgb_at(px, py);
                    r_sum += r as i32;
                    g_sum += g as i32;
                    b_sum += b as i32;
                }
            }

            let (_, u, v) = rgb_to_yuv(r_sum / 4, g_sum / 4, b_sum / 4);
            i420[u_offset + cy * cw + cx] = u;
            i420[v_offset + cy * cw + cx] = v;
        }
    }

    i420
}

/// De-interleave the NV12 UV plane into I420's separate U and V planes.
fn nv12_to_i420(nv12: &[u8], width: u32, height: u32) -> Vec<u8> {
    let y_size = width as usize * height as usize;
    let (cw, ch) = chroma_size(width, height);
    let uv_size = cw * ch;

    let mut i420 = vec![0u8; y_size + uv_size * 2];
    i420[..y_size].copy_from_slice(&nv12[..y_size]);

    let uv_plane = &nv12[y_size..y_size + uv_size * 2];
    for i in 0..uv_size {
        i420[y_size + i] = uv_plane[i * 2];
        i420[y_size + uv_size + i] = uv_plane[i * 2 + 1];
    }

    i420
}
