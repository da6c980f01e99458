//! YUV4MPEG2 (`.y4m`) recording container.
//!
//! Y4M is an uncompressed, line-headered stream that most video tools read
//! directly, which makes it a good fit for short PPG capture sessions where
//! every pixel matters for later analysis.
//!
//! # Layout
//!
//! ```text
//! YUV4MPEG2 W<w> H<h> F<fps>:1 Ip A1:1 C420jpeg XSTART=<value>:<timescale>\n
//! FRAME XPTS=<microseconds since start>\n
//! <I420 payload>
//! FRAME XPTS=...\n
//! ...
//! ```
//!
//! The `XSTART` / `XPTS` application parameters keep the capture timeline so
//! a recording can be re-aligned with the sample log.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::{
    expected_frame_size, CodecError, FormatDescription, MediaTime, PixelFormat, VideoFrame,
    VideoWriter, WriterFactory, WriterSummary,
};

const STREAM_MAGIC: &str = "YUV4MPEG2";
const FRAME_MAGIC: &str = "FRAME";

/// Opens [`Y4mWriter`]s at a fixed nominal frame rate.
#[derive(Debug, Clone, Copy)]
pub struct Y4mWriterFactory {
    frame_rate: u32,
}

impl Y4mWriterFactory {
    /// Create a factory writing streams tagged with `frame_rate` fps.
    #[must_use]
    pub fn new(frame_rate: u32) -> Self {
        Self { frame_rate }
    }
}

impl WriterFactory for Y4mWriterFactory {
    fn open(
        &self,
        destination: &Path,
        start_time: MediaTime,
        format: &FormatDescription,
    ) -> Result<Box<dyn VideoWriter>, CodecError> {
        let writer = Y4mWriter::create(destination, start_time, *format, self.frame_rate)?;
        Ok(Box::new(writer))
    }
}

/// Writes I420 frames to a `.y4m` file.
pub struct Y4mWriter {
    out: BufWriter<File>,
    format: FormatDescription,
    start_time: MediaTime,
    frames_written: u64,
    bytes_written: u64,
}

impl Y4mWriter {
    /// Create the file and write the stream header.
    pub fn create(
        path: &Path,
        start_time: MediaTime,
        format: FormatDescription,
        frame_rate: u32,
    ) -> Result<Self, CodecError> {
        if format.width == 0 || format.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: format.width,
                height: format.height,
            });
        }
        if !start_time.is_valid() {
            return Err(CodecError::malformed(format!(
                "invalid start time {start_time}"
            )));
        }

        let mut out = BufWriter::new(File::create(path)?);
        let header = format!(
            "{STREAM_MAGIC} W{} H{} F{}:1 Ip A1:1 C420jpeg XSTART={}:{}\n",
            format.width,
            format.height,
            frame_rate.max(1),
            start_time.value,
            start_time.timescale
        );
        out.write_all(header.as_bytes())?;

        Ok(Self {
            out,
            format,
            start_time,
            frames_written: 0,
            bytes_written: header.len() as u64,
        })
    }
}

impl VideoWriter for Y4mWriter {
    fn append(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        if frame.format() != self.format {
            return Err(CodecError::FormatMismatch {
                expected: self.format,
                actual: frame.format(),
            });
        }
        let payload = frame.to_i420()?;
        let header = format!(
            "{FRAME_MAGIC} XPTS={}\n",
            frame.pts.micros_since(self.start_time)
        );
        self.out.write_all(header.as_bytes())?;
        self.out.write_all(&payload)?;
        self.frames_written += 1;
        self.bytes_written += (header.len() + payload.len()) as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<WriterSummary, CodecError> {
        let Self {
            out,
            frames_written,
            bytes_written,
            ..
        } = *self;
        let file = out
            .into_inner()
            .map_err(|e| CodecError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(WriterSummary {
            frames_written,
            bytes_written,
        })
    }
}

/// Contents of a `.y4m` file as seen by [`inspect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Y4mSummary {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Nominal frame rate as (numerator, denominator).
    pub frame_rate: (u32, u32),
    /// Recording start time, if the stream carries one.
    pub start_time: Option<MediaTime>,
    /// Per-frame offsets from the start time, in microseconds.
    pub frame_offsets_us: Vec<i64>,
}

impl Y4mSummary {
    /// Number of frames in the stream.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frame_offsets_us.len()
    }
}

/// Read a `.y4m` file and summarize its header and frame timeline.
pub fn inspect(path: &Path) -> Result<Y4mSummary, CodecError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut fields = line.trim_end().split(' ');
    if fields.next() != Some(STREAM_MAGIC) {
        return Err(CodecError::malformed("missing YUV4MPEG2 signature"));
    }

    let mut summary = Y4mSummary {
        width: 0,
        height: 0,
        frame_rate: (0, 1),
        start_time: None,
        frame_offsets_us: Vec::new(),
    };
    for field in fields.filter(|f| !f.is_empty()) {
        let mut chars = field.chars();
        let tag = chars.next();
        let value = chars.as_str();
        match tag {
            Some('W') => summary.width = parse_number(value)?,
            Some('H') => summary.height = parse_number(value)?,
            Some('F') => summary.frame_rate = parse_ratio(value)?,
            Some('X') => {
                if let Some(start) = value.strip_prefix("START=") {
                    let (value, timescale) = split_ratio(start)?;
                    summary.start_time = Some(MediaTime::new(
                        parse_number(value)?,
                        parse_number(timescale)?,
                    ));
                }
            }
            _ => {}
        }
    }

    let frame_size = expected_frame_size(summary.width, summary.height, PixelFormat::I420)
        .ok_or_else(|| {
            CodecError::malformed(format!(
                "frame size {}x{} is too large",
                summary.width, summary.height
            ))
        })? as u64;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let mut fields = line.trim_end().split(' ');
        if fields.next() != Some(FRAME_MAGIC) {
            return Err(CodecError::malformed(format!(
                "expected frame header, found {:?}",
                line.trim_end()
            )));
        }
        let offset = fields
            .find_map(|f| f.strip_prefix("XPTS="))
            .map(parse_number::<i64>)
            .transpose()?
            .unwrap_or(0);
        let skipped = io::copy(&mut (&mut reader).take(frame_size), &mut io::sink())?;
        if skipped != frame_size {
            return Err(CodecError::malformed("truncated frame payload"));
        }
        summary.frame_offsets_us.push(offset);
    }

    Ok(summary)
}

fn split_ratio(value: &str) -> Result<(&str, &str), CodecError> {
    value
        .split_once(':')
        .ok_or_else(|| CodecError::malformed(format!("expected ratio, found {value:?}")))
}

fn parse_ratio(value: &str) -> Result<(u32, u32), CodecError> {
    let (num, den) = split_ratio(value)?;
    Ok((parse_number(num)?, parse_number(den)?))
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, CodecError> {
    value
        .parse()
        .map_err(|_| CodecError::malformed(format!("bad number {value:?}")))
}
