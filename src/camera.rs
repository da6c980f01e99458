//! V4L2 camera capture.
//!
//! Opens a `/dev/videoN` device, negotiates MJPEG, YUYV or greyscale, and
//! hands out RGB [`VideoFrame`]s stamped with the driver's capture time in
//! microseconds. Drivers that leave the buffer timestamp empty fall back to
//! microseconds since the stream started.
//!
//! # Example
//!
//! ```rust,no_run
//! use ppgcam::camera::{Camera, list_cameras};
//!
//! for cam in list_cameras().unwrap() {
//!     println!("Camera: {} (index {})", cam.name, cam.index);
//! }
//!
//! let mut camera = Camera::open(0, 640, 480, 60).unwrap();
//! let frame = camera.capture().unwrap();
//! println!("Frame: {}x{} at {}", frame.width, frame.height, frame.pts);
//! ```

use anyhow::{Context, Result};
use ppgcam_codec::{yuv_to_rgb, FormatDescription, MediaTime, PixelFormat, VideoFrame};
use std::path::PathBuf;
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Whether `fourcc` at `width`x`height` is an advertised frame size.
/// Drivers that cannot enumerate are assumed to support it.
fn device_supports_resolution(device: &Device, fourcc: FourCC, width: u32, height: u32) -> bool {
    let framesizes = match device.enum_framesizes(fourcc) {
        Ok(sizes) => sizes,
        Err(_) => return true,
    };
    if framesizes.is_empty() {
        return true;
    }
    for fs in framesizes {
        match fs.size {
            FrameSizeEnum::Discrete(d) => {
                if d.width == width && d.height == height {
                    return true;
                }
            }
            FrameSizeEnum::Stepwise(s) => {
                let w_ok = width >= s.min_width
                    && width <= s.max_width
                    && (s.step_width == 0 || (width - s.min_width) % s.step_width == 0);
                let h_ok = height >= s.min_height
                    && height <= s.max_height
                    && (s.step_height == 0 || (height - s.min_height) % s.step_height == 0);
                if w_ok && h_ok {
                    return true;
                }
            }
        }
    }
    false
}

/// Information about an available camera.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Camera index (used to open the camera).
    pub index: u32,
    /// Human-readable camera name.
    pub name: String,
    /// Device path (e.g., /dev/video0).
    pub path: PathBuf,
}

/// A camera capture device using V4L2.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    format: CaptureFormat,
    start_time: std::time::Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CaptureFormat {
    Mjpeg,
    Yuyv,
    Grey,
}

// Camera is Send because v4l types are Send
unsafe impl Send for Camera {}

impl Camera {
    /// Open `/dev/video{index}` at the requested size and frame rate.
    pub fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        let path = format!("/dev/video{}", index);
        Self::open_path(&path, width, height, fps)
    }

    /// Open a camera by device path.
    ///
    /// The driver may settle on a different size or rate; [`width`](Self::width)
    /// and [`height`](Self::height) report what it picked.
    pub fn open_path(path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        let device =
            Device::with_path(path).with_context(|| format!("Failed to open camera {path}"))?;

        let (format, capture_format) = Self::negotiate_format(&device, width, height)?;
        match device.set_params(&Parameters::with_fps(fps)) {
            Ok(params) => {
                tracing::info!(path, requested_fps = fps, interval = ?params.interval, "Frame interval set")
            }
            Err(e) => tracing::warn!(path, fps, "Failed to set frame rate: {e}"),
        }

        let width = format.width;
        let height = format.height;
        tracing::info!(path, width, height, fourcc = %format.fourcc, "Camera opened");

        // Stream borrows the device for 'static, so leak it
        let device = Box::leak(Box::new(device));
        let stream = Stream::with_buffers(device, Type::VideoCapture, 4)?;

        Ok(Camera {
            stream,
            width,
            height,
            format: capture_format,
            start_time: std::time::Instant::now(),
        })
    }

    /// MJPEG first, then YUYV if advertised at this size, then whatever the
    /// driver keeps.
    fn negotiate_format(
        device: &Device,
        width: u32,
        height: u32,
    ) -> Result<(v4l::Format, CaptureFormat)> {
        let mut format = device.format()?;
        format.width = width;
        format.height = height;

        let yuyv = FourCC::new(b"YUYV");
        let mjpg = FourCC::new(b"MJPG");

        // MJPEG sizes are often not enumerated even when supported
        format.fourcc = mjpg;
        if let Ok(f) = device.set_format(&format) {
            if f.fourcc == mjpg {
                return Ok((f, CaptureFormat::Mjpeg));
            }
        }

        if device_supports_resolution(device, yuyv, width, height) {
            format.fourcc = yuyv;
            if let Ok(f) = device.set_format(&format) {
                if f.fourcc == yuyv {
                    return Ok((f, CaptureFormat::Yuyv));
                }
            }
        }

        let f = device.format()?;
        let is_grey = [b"GREY", b"Y8  ", b"Y800"]
            .iter()
            .any(|code| f.fourcc == FourCC::new(*code));
        let capture = if f.fourcc == yuyv {
            CaptureFormat::Yuyv
        } else if is_grey {
            CaptureFormat::Grey
        } else {
            CaptureFormat::Mjpeg
        };
        Ok((f, capture))
    }

    /// Get the actual frame width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get the actual frame height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get the capture format.
    pub fn format_name(&self) -> &'static str {
        match self.format {
            CaptureFormat::Mjpeg => "MJPEG",
            CaptureFormat::Yuyv => "YUYV",
            CaptureFormat::Grey => "GREY",
        }
    }

    /// Format of the frames [`capture`](Self::capture) returns.
    pub fn frame_format(&self) -> FormatDescription {
        FormatDescription::new(PixelFormat::Rgb, self.width, self.height)
    }

    /// Capture a single frame (converted to RGB).
    pub fn capture(&mut self) -> Result<VideoFrame> {
        let (data, meta) = self.stream.next()?;
        let timestamp_us = driver_micros(
            i64::from(meta.timestamp.sec),
            i64::from(meta.timestamp.usec),
        )
        .unwrap_or_else(|| self.start_time.elapsed().as_micros() as u64);

        let expected_yuyv = (self.width as usize) * (self.height as usize) * 2;

        let rgb_data = match self.format {
            CaptureFormat::Yuyv if data.len() >= expected_yuyv => {
                Self::yuyv_to_rgb(data, self.width, self.height)
            }
            CaptureFormat::Yuyv => {
                tracing::debug!(len = data.len(), "Short YUYV buffer, switching to MJPEG decode");
                self.format = CaptureFormat::Mjpeg;
                Self::mjpeg_to_rgb(data)?
            }
            CaptureFormat::Grey => Self::grey_to_rgb(data, self.width, self.height),
            CaptureFormat::Mjpeg => Self::mjpeg_to_rgb(data)?,
        };

        Ok(VideoFrame::from_rgb(
            self.width,
            self.height,
            rgb_data,
            MediaTime::from_micros(timestamp_us),
        ))
    }

    fn mjpeg_to_rgb(data: &[u8]) -> Result<Vec<u8>> {
        use image::ImageReader;
        use std::io::Cursor;

        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .decode()?
            .to_rgb8();

        Ok(img.into_raw())
    }

    fn grey_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;
        let mut rgb = Vec::with_capacity(w * h * 3);
        for &y in data.iter().take(w * h) {
            rgb.extend_from_slice(&[y, y, y]);
        }
        rgb.resize(w * h * 3, 0);
        rgb
    }

    fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
        let pixels = width as usize * height as usize;
        let mut rgb = Vec::with_capacity(pixels * 3);
        // Each 4-byte group is Y0 U Y1 V covering two pixels
        for group in yuyv.chunks_exact(4).take(pixels / 2) {
            let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
            let (r, g, b) = yuv_to_rgb(y0, u, v);
            rgb.extend_from_slice(&[r, g, b]);
            let (r, g, b) = yuv_to_rgb(y1, u, v);
            rgb.extend_from_slice(&[r, g, b]);
        }
        rgb.resize(pixels * 3, 0);
        rgb
    }
}

/// List `/dev/video*` devices, sorted by index.
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    let mut cameras = Vec::new();

    for entry in std::fs::read_dir("/dev")? {
        let path = entry?.path();
        let Some(index) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let name = Device::with_path(&path)
            .and_then(|device| device.query_caps())
            .map(|caps| caps.card)
            .unwrap_or_else(|_| format!("Camera {}", index));
        cameras.push(CameraInfo { index, name, path });
    }

    cameras.sort_by_key(|c| c.index);
    Ok(cameras)
}

/// Buffer capture time in microseconds, if the driver set one.
fn driver_micros(sec: i64, usec: i64) -> Option<u64> {
    let micros = sec.checked_mul(1_000_000)?.checked_add(usec)?;
    u64::try_from(micros).ok().filter(|us| *us > 0)
}
