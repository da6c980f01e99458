//! PPG recorder: runs a capture session, logs per-frame samples and
//! optionally records a synchronized copy of the video.
//!
//! Output, in `--output-dir`:
//!   <prefix>.jsonl   one sample per line, sorted in one-second batches
//!   <prefix>.y4m     the recorded frames (with --record)
//!
//! Usage:
//!   ppg-recorder [options]
//!
//! Options:
//!   --settings <file>       Camera settings JSON (camelCase, all fields optional)
//!   --output-dir <dir>      Output directory (default: .)
//!   --prefix <name>         Output file prefix (default: ppg_<unix seconds>)
//!   --record                Record video alongside the sample log
//!   --duration <seconds>    Stop after N seconds (default: Ctrl+C)
//!   --camera <index>        Capture from /dev/video<index> (feature `camera`)
//!   --synthetic             Use the simulated source (default without --camera)
//!   --width / --height      Capture size (default: 640x480)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use ppgcam::codec::y4m;
use ppgcam::{
    CameraSettings, FormatDescription, MediaTime, PixelSample, ProcessorDelegate, ProcessorError,
    ProcessorOptions, SampleLog, SerialQueue, SyntheticSource, VideoFrame, VideoProcessor,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

struct Args {
    settings: Option<PathBuf>,
    output_dir: PathBuf,
    prefix: String,
    record: bool,
    duration_secs: Option<u64>,
    camera: Option<u32>,
    width: u32,
    height: u32,
}

fn parse_args() -> Args {
    let matches = Command::new("ppg-recorder")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("FILE")
                .help("Camera settings JSON file.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_name("DIR")
                .help("Directory for the sample log and recording.")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .value_name("NAME")
                .help("Output file prefix."),
        )
        .arg(
            Arg::new("record")
                .long("record")
                .help("Record video alongside the sample log.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds instead of waiting for Ctrl+C.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("camera")
                .long("camera")
                .value_name("INDEX")
                .help("Capture from /dev/video<INDEX>.")
                .conflicts_with("synthetic")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("synthetic")
                .long("synthetic")
                .help("Use the simulated finger-over-lens source.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .default_value("640")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .default_value("480")
                .value_parser(value_parser!(u32)),
        )
        .get_matches();

    let prefix = matches
        .get_one::<String>("prefix")
        .cloned()
        .unwrap_or_else(|| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            format!("ppg_{}", secs)
        });

    Args {
        settings: matches.get_one::<PathBuf>("settings").cloned(),
        output_dir: matches
            .get_one::<PathBuf>("output-dir")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(".")),
        prefix,
        record: matches.get_flag("record"),
        duration_secs: matches.get_one::<u64>("duration").copied(),
        camera: matches.get_one::<u32>("camera").copied(),
        width: matches.get_one::<u32>("width").copied().unwrap_or(640),
        height: matches.get_one::<u32>("height").copied().unwrap_or(480),
    }
}

// ---------------------------------------------------------------------------
// Frame sources
// ---------------------------------------------------------------------------

enum Source {
    Synthetic {
        source: SyntheticSource,
        interval: Duration,
    },
    #[cfg(feature = "camera")]
    Camera(ppgcam::camera::Camera),
}

impl Source {
    fn open(args: &Args, frame_rate: u32) -> Result<Self> {
        match args.camera {
            #[cfg(feature = "camera")]
            Some(index) => Ok(Source::Camera(ppgcam::camera::Camera::open(
                index,
                args.width,
                args.height,
                frame_rate,
            )?)),
            #[cfg(not(feature = "camera"))]
            Some(_) => anyhow::bail!("--camera requires building with the `camera` feature"),
            None => Ok(Source::Synthetic {
                source: SyntheticSource::new(args.width, args.height, frame_rate),
                interval: Duration::from_secs_f64(1.0 / f64::from(frame_rate.max(1))),
            }),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Source::Synthetic { .. } => "synthetic",
            #[cfg(feature = "camera")]
            Source::Camera(_) => "camera",
        }
    }

    fn format(&self) -> FormatDescription {
        match self {
            Source::Synthetic { source, .. } => source.format(),
            #[cfg(feature = "camera")]
            Source::Camera(camera) => camera.frame_format(),
        }
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        match self {
            Source::Synthetic { source, interval } => {
                std::thread::sleep(*interval);
                Ok(source.next_frame())
            }
            #[cfg(feature = "camera")]
            Source::Camera(camera) => camera.capture(),
        }
    }
}

/// Pull frames into the processor until cancelled.
fn capture_loop(
    mut source: Source,
    processor: Arc<VideoProcessor>,
    cancel: CancellationToken,
) -> u64 {
    let mut frames = 0u64;
    while !cancel.is_cancelled() {
        match source.next_frame() {
            Ok(frame) => {
                processor.append_frame(&frame);
                frames += 1;
            }
            Err(e) => {
                tracing::error!("Capture failed: {e:#}");
                cancel.cancel();
                break;
            }
        }
    }
    frames
}

// ---------------------------------------------------------------------------
// Delegate
// ---------------------------------------------------------------------------

/// Logs when the finger goes on or off the lens.
#[derive(Default)]
struct CoverageWatch {
    covering: Mutex<Option<bool>>,
}

impl ProcessorDelegate for CoverageWatch {
    fn on_sample(&self, sample: PixelSample) {
        let mut covering = self.covering.lock().unwrap_or_else(|e| e.into_inner());
        if *covering != Some(sample.is_covering_lens) {
            if sample.is_covering_lens {
                tracing::info!(
                    t = sample.presentation_timestamp,
                    red = sample.red,
                    "Lens covered"
                );
            } else {
                tracing::info!(
                    t = sample.presentation_timestamp,
                    red = sample.red,
                    green = sample.green,
                    blue = sample.blue,
                    "Lens not covered, place a fingertip over the camera"
                );
            }
            *covering = Some(sample.is_covering_lens);
        }
    }

    fn on_recording_error(&self, error: &ProcessorError) {
        if error.is_recording_error() {
            tracing::error!("Recording failed: {error}");
        }
    }
}

fn print_recording(path: &Path) {
    match y4m::inspect(path) {
        Ok(summary) => {
            let span_ms = summary
                .frame_offsets_us
                .last()
                .map(|us| *us as f64 / 1000.0)
                .unwrap_or_default();
            println!(
                "Video:      {} ({}x{}, {} frames, {:.1} ms)",
                path.display(),
                summary.width,
                summary.height,
                summary.frame_count(),
                span_ms
            );
        }
        Err(e) => tracing::warn!("Failed to inspect {}: {}", path.display(), e),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ppgcam=info".parse()?)
                .add_directive("ppg_recorder=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let args = parse_args();
    let settings = match &args.settings {
        Some(path) => CameraSettings::load(path)?,
        None => CameraSettings::default(),
    };
    let cancel = CancellationToken::new();

    // Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received, stopping...");
        cancel_clone.cancel();
    });

    // Duration timer
    if let Some(secs) = args.duration_secs {
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::info!("Duration reached ({}s), stopping...", secs);
            cancel_clone.cancel();
        });
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let log_path = args.output_dir.join(format!("{}.jsonl", args.prefix));
    let video_path = args.output_dir.join(format!("{}.y4m", args.prefix));

    let source = Source::open(&args, settings.frame_rate)?;
    let format = source.format();

    println!();
    println!("========================================");
    println!("PPG Recorder");
    println!("========================================");
    println!("Source:     {} ({})", source.name(), format);
    println!("Frame rate: {} fps", settings.frame_rate);
    println!("Samples:    {}", log_path.display());
    if args.record {
        println!("Video:      {}", video_path.display());
    }
    match args.duration_secs {
        Some(d) => println!("Duration:   {}s", d),
        None => println!("Duration:   until Ctrl+C"),
    }
    println!("========================================");
    println!();

    let log = Arc::new(
        SampleLog::create(&log_path, settings.frame_rate)?
            .with_observer(Arc::new(CoverageWatch::default())),
    );
    let queue = Arc::new(SerialQueue::new("ppg-callbacks")?);
    let processor = Arc::new(VideoProcessor::with_options(
        &log,
        settings.frame_rate,
        queue.clone(),
        ProcessorOptions {
            thresholds: settings.coverage,
            ..Default::default()
        },
    )?);

    if args.record {
        processor.start_recording(&video_path, MediaTime::ZERO, format);
    }

    let capture = {
        let processor = processor.clone();
        let cancel = cancel.clone();
        std::thread::Builder::new()
            .name("ppg-capture".to_string())
            .spawn(move || capture_loop(source, processor, cancel))?
    };

    cancel.cancelled().await;
    let captured = tokio::task::spawn_blocking(move || capture.join())
        .await?
        .map_err(|_| anyhow::anyhow!("capture thread panicked"))?;

    processor.stop_recording_async().await;
    let queue_drain = queue.clone();
    tokio::task::spawn_blocking(move || queue_drain.flush()).await?;
    let written = log.finish()?;

    let stats = processor.stats();
    println!();
    println!("Captured:   {} frames", captured);
    println!(
        "Processed:  {} samples ({} dropped), {} written to {}",
        stats.frames_processed,
        stats.frames_dropped,
        written,
        log_path.display()
    );
    if args.record {
        print_recording(&video_path);
    }

    Ok(())
}
