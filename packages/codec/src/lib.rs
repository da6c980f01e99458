//! Frame types and recording writers for ppgcam.
//!
//! This crate holds the pieces of the capture pipeline that deal with raw
//! video rather than with the optical signal:
//!
//! - [`VideoFrame`], [`PixelFormat`], [`MediaTime`] and [`FormatDescription`]
//!   describe what the capture stack hands over.
//! - [`VideoWriter`] / [`WriterFactory`] are the muxer seam a recording sink
//!   writes through.
//! - [`memory`] keeps presentation times in memory and can inject failures.
//! - [`y4m`] is the default container: uncompressed YUV4MPEG2 with the capture
//!   timeline kept in per-frame application parameters.
//!
//! # Quick Start
//!
//! ```ignore
//! use ppgcam_codec::{FormatDescription, MediaTime, PixelFormat, VideoFrame, WriterFactory};
//! use ppgcam_codec::y4m::Y4mWriterFactory;
//!
//! let format = FormatDescription::new(PixelFormat::Bgra, 640, 480);
//! let mut writer = Y4mWriterFactory::new(60).open(path, MediaTime::ZERO, &format)?;
//!
//! let frame = VideoFrame::from_bgra(640, 480, bgra_data, MediaTime::from_micros(0));
//! writer.append(&frame)?;
//! writer.finish()?;
//! ```

mod error;
mod frame;
pub mod memory;
mod traits;
mod types;
pub mod y4m;

pub use error::CodecError;
pub use frame::{expected_frame_size, yuv_to_rgb, VideoFrame};
pub use traits::{VideoWriter, WriterFactory, WriterSummary};
pub use types::{FormatDescription, MediaTime, PixelFormat};
