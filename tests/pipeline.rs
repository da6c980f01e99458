//! End-to-end behaviour of the frame pipeline: sampling, timestamps and
//! recording spans, driven through the public `VideoProcessor` API.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use ppgcam::codec::memory::{FailurePlan, MemoryWriterFactory};
use ppgcam::codec::y4m;
use ppgcam::{
    FormatDescription, ManualClock, MediaTime, PixelFormat, PixelSample, ProcessorDelegate,
    ProcessorError, ProcessorOptions, RecordingState, SampleLog, SerialQueue, SyntheticSource,
    VideoFrame, VideoProcessor,
};

#[derive(Default)]
struct Recorder {
    samples: Mutex<Vec<PixelSample>>,
    errors: Mutex<Vec<String>>,
}

impl ProcessorDelegate for Recorder {
    fn on_sample(&self, sample: PixelSample) {
        self.samples.lock().unwrap().push(sample);
    }

    fn on_recording_error(&self, error: &ProcessorError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

struct Session {
    processor: VideoProcessor,
    delegate: Arc<Recorder>,
    queue: Arc<SerialQueue>,
    factory: MemoryWriterFactory,
}

impl Session {
    fn new(factory: MemoryWriterFactory) -> Self {
        let delegate = Arc::new(Recorder::default());
        let queue = Arc::new(SerialQueue::new("pipeline-test").unwrap());
        let processor = VideoProcessor::with_options(
            &delegate,
            60,
            queue.clone(),
            ProcessorOptions {
                clock: Arc::new(ManualClock::new(250.0)),
                writer_factory: Some(Arc::new(factory.clone())),
                ..Default::default()
            },
        )
        .unwrap();
        Self {
            processor,
            delegate,
            queue,
            factory,
        }
    }

    fn stop_and_wait(&self) {
        let (tx, rx) = mpsc::channel();
        self.processor.stop_recording(move || {
            let _ = tx.send(());
        });
        rx.recv().unwrap();
    }

    fn samples(&self) -> Vec<PixelSample> {
        self.queue.flush();
        self.delegate.samples.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.queue.flush();
        self.delegate.errors.lock().unwrap().clone()
    }
}

fn format() -> FormatDescription {
    FormatDescription::new(PixelFormat::Bgra, 16, 16)
}

fn frame(i: i64) -> VideoFrame {
    VideoFrame::solid(16, 16, PixelFormat::Bgra, [190, 35, 20], MediaTime::new(i, 60))
}

#[test]
fn uniform_frames_report_their_color() {
    let session = Session::new(MemoryWriterFactory::new());
    let gray = VideoFrame::solid(16, 16, PixelFormat::Rgba, [77, 77, 77], MediaTime::ZERO);
    session.processor.append_frame(&gray);

    let samples = session.samples();
    assert_eq!(samples.len(), 1);
    let s = samples[0];
    assert_eq!((s.red, s.green, s.blue), (77.0, 77.0, 77.0));
    assert_eq!(s.red_sd, 0.0);
    assert!(!s.is_covering_lens);
}

#[test]
fn frames_claiming_impossible_dimensions_are_dropped_and_reported() {
    let session = Session::new(MemoryWriterFactory::new());
    let huge = VideoFrame::new(1 << 31, 1 << 31, PixelFormat::Bgra, vec![0; 16], MediaTime::ZERO);
    session.processor.append_frame(&huge);
    session.processor.append_frame(&frame(0));

    assert_eq!(session.samples().len(), 1);
    let errors = session.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("2147483648x2147483648"), "{}", errors[0]);
    assert_eq!(session.processor.stats().frames_dropped, 1);
}

#[test]
fn timestamps_start_at_first_frame_uptime_and_never_decrease() {
    let session = Session::new(MemoryWriterFactory::new());
    for i in [0, 1, 2, 4, 3, 5, 5, 6] {
        session.processor.append_frame(&frame(i));
    }

    let samples = session.samples();
    assert_eq!(samples.len(), 8);
    assert_eq!(
        Some(samples[0].presentation_timestamp),
        session.processor.start_system_uptime()
    );
    assert_eq!(samples[0].presentation_timestamp, 250.0);
    for pair in samples.windows(2) {
        assert!(pair[1].presentation_timestamp >= pair[0].presentation_timestamp);
    }
    // One regression (4 -> 3), reported but not dropped
    assert_eq!(session.errors().len(), 1);
}

#[test]
fn stop_while_idle_completes_without_effects() {
    let session = Session::new(MemoryWriterFactory::new());
    session.stop_and_wait();
    assert_eq!(session.processor.recording_state(), RecordingState::Idle);
    assert_eq!(session.processor.destination(), None);
    assert!(session.errors().is_empty());
    assert!(session.factory.recordings().is_empty());
}

#[test]
fn recording_holds_every_frame_appended_while_armed() {
    let session = Session::new(MemoryWriterFactory::new());
    session
        .processor
        .start_recording("span.y4m", MediaTime::ZERO, format());
    for i in 0..12 {
        session.processor.append_frame(&frame(i));
    }
    session.stop_and_wait();

    assert_eq!(session.samples().len(), 12);
    let recordings = session.factory.recordings();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].frames.len(), 12);
    assert!(recordings[0].finished);
    assert_eq!(session.processor.stats().frames_recorded, 12);
}

#[test]
fn frames_after_stop_are_sampled_but_not_recorded() {
    let session = Session::new(MemoryWriterFactory::new());
    session
        .processor
        .start_recording("span.y4m", MediaTime::ZERO, format());
    for i in 0..3 {
        session.processor.append_frame(&frame(i));
    }

    let (tx, rx) = mpsc::channel();
    session.processor.stop_recording(move || {
        let _ = tx.send(());
    });
    for i in 3..6 {
        session.processor.append_frame(&frame(i));
    }
    rx.recv().unwrap();

    assert_eq!(session.samples().len(), 6);
    let frames = &session.factory.recordings()[0].frames;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames.last(), Some(&MediaTime::new(2, 60)));
}

#[test]
fn writer_failure_reports_once_and_sampling_continues() {
    let session = Session::new(MemoryWriterFactory::failing(FailurePlan {
        append_at: Some(4),
        ..Default::default()
    }));
    session
        .processor
        .start_recording("span.y4m", MediaTime::ZERO, format());
    for i in 0..20 {
        session.processor.append_frame(&frame(i));
    }
    session.stop_and_wait();

    assert_eq!(session.processor.recording_state(), RecordingState::Idle);
    assert_eq!(session.errors().len(), 1);
    assert_eq!(session.samples().len(), 20);
}

#[test]
fn a_session_can_record_several_spans() {
    let session = Session::new(MemoryWriterFactory::new());
    for (span, name) in ["first.y4m", "second.y4m"].iter().enumerate() {
        session
            .processor
            .start_recording(*name, MediaTime::new(span as i64 * 10, 60), format());
        for i in 0..5 {
            session.processor.append_frame(&frame(span as i64 * 10 + i));
        }
        session.stop_and_wait();
    }

    let recordings = session.factory.recordings();
    assert_eq!(recordings.len(), 2);
    assert_eq!(recordings[1].start_time, MediaTime::new(10, 60));
    assert_eq!(recordings[1].frames.len(), 5);
    assert_eq!(
        session.processor.destination(),
        Some(PathBuf::from("second.y4m"))
    );
}

#[test]
fn stop_can_be_requested_from_a_callback() {
    struct StopOnFirst {
        processor: Mutex<Option<Arc<VideoProcessor>>>,
        done: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl ProcessorDelegate for StopOnFirst {
        fn on_sample(&self, _sample: PixelSample) {
            let processor = self.processor.lock().unwrap().take();
            if let Some(processor) = processor {
                let done = self.done.lock().unwrap().take();
                processor.stop_recording(move || {
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                });
            }
        }
    }

    let (tx, rx) = mpsc::channel();
    let delegate = Arc::new(StopOnFirst {
        processor: Mutex::new(None),
        done: Mutex::new(Some(tx)),
    });
    let queue = Arc::new(SerialQueue::new("reentrant-test").unwrap());
    let factory = MemoryWriterFactory::new();
    let processor = Arc::new(
        VideoProcessor::with_options(
            &delegate,
            60,
            queue.clone(),
            ProcessorOptions {
                writer_factory: Some(Arc::new(factory.clone())),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    *delegate.processor.lock().unwrap() = Some(processor.clone());

    processor.start_recording("cb.y4m", MediaTime::ZERO, format());
    processor.append_frame(&frame(0));
    rx.recv().unwrap();
    assert_eq!(processor.recording_state(), RecordingState::Idle);
    assert!(factory.recordings()[0].finished);
}

#[test]
fn concurrent_start_and_stop_callers_are_serialized() {
    let factory = MemoryWriterFactory::new();
    let delegate = Arc::new(Recorder::default());
    let queue = Arc::new(SerialQueue::new("race-test").unwrap());
    let processor = Arc::new(
        VideoProcessor::with_options(
            &delegate,
            60,
            queue.clone(),
            ProcessorOptions {
                writer_factory: Some(Arc::new(factory.clone())),
                ..Default::default()
            },
        )
        .unwrap(),
    );

    let streaming = Arc::new(AtomicBool::new(true));
    let capture = {
        let processor = processor.clone();
        let streaming = streaming.clone();
        thread::spawn(move || {
            let mut i = 0;
            while streaming.load(Ordering::SeqCst) {
                processor.append_frame(&frame(i));
                i += 1;
            }
        })
    };

    let callers: Vec<_> = (0..4)
        .map(|caller| {
            let processor = processor.clone();
            thread::spawn(move || {
                let mut completions = Vec::new();
                for round in 0..25 {
                    processor.start_recording(
                        format!("race-{caller}-{round}.y4m"),
                        MediaTime::ZERO,
                        format(),
                    );
                    let fired = Arc::new(AtomicUsize::new(0));
                    let counter = fired.clone();
                    processor.stop_recording(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    completions.push(fired);
                }
                completions
            })
        })
        .collect();
    let completions: Vec<Arc<AtomicUsize>> = callers
        .into_iter()
        .flat_map(|caller| caller.join().unwrap())
        .collect();
    streaming.store(false, Ordering::SeqCst);
    capture.join().unwrap();

    let (tx, rx) = mpsc::channel();
    processor.stop_recording(move || {
        let _ = tx.send(());
    });
    rx.recv().unwrap();
    assert_eq!(processor.recording_state(), RecordingState::Idle);

    // Dropping the last handle joins every writer thread
    let processor = Arc::try_unwrap(processor)
        .ok()
        .expect("processor still shared");
    drop(processor);
    queue.flush();

    assert_eq!(completions.len(), 100);
    assert!(completions.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(factory.peak_open_writers(), 1);
    let recordings = factory.recordings();
    assert!(!recordings.is_empty());
    assert!(recordings.iter().all(|r| r.finished));
}

#[test]
fn synthetic_session_writes_log_and_video() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("samples.jsonl");
    let video_path = dir.path().join("capture.y4m");

    let log = Arc::new(SampleLog::create(&log_path, 60).unwrap());
    let queue = Arc::new(SerialQueue::new("synthetic-test").unwrap());
    let processor = VideoProcessor::new(&log, 60, queue.clone()).unwrap();

    let mut source = SyntheticSource::new(32, 24, 60);
    processor.start_recording(&video_path, MediaTime::new(0, 60), source.format());
    for frame in source.by_ref().take(90) {
        processor.append_frame(&frame);
    }
    let (tx, rx) = mpsc::channel();
    processor.stop_recording(move || {
        let _ = tx.send(());
    });
    rx.recv().unwrap();
    queue.flush();
    assert_eq!(log.finish().unwrap(), 90);

    let samples = SampleLog::read(&log_path).unwrap();
    assert_eq!(samples.len(), 90);
    assert!(samples.iter().all(|s| s.is_covering_lens));
    assert!(samples
        .windows(2)
        .all(|w| w[1].presentation_timestamp > w[0].presentation_timestamp));

    let summary = y4m::inspect(&video_path).unwrap();
    assert_eq!(summary.frame_count(), 90);
    assert_eq!((summary.width, summary.height), (32, 24));
    assert_eq!(summary.frame_offsets_us[60], 1_000_000);
    assert_eq!(processor.last_recording().map(|s| s.frames_written), Some(90));
}

#[test]
fn dropping_the_processor_finalizes_the_recording() {
    let factory = MemoryWriterFactory::new();
    let delegate = Arc::new(Recorder::default());
    let queue = Arc::new(SerialQueue::new("drop-test").unwrap());
    let processor = VideoProcessor::with_options(
        &delegate,
        60,
        queue.clone(),
        ProcessorOptions {
            writer_factory: Some(Arc::new(factory.clone())),
            ..Default::default()
        },
    )
    .unwrap();

    processor.start_recording("dropped.y4m", MediaTime::ZERO, format());
    for i in 0..4 {
        processor.append_frame(&frame(i));
    }
    drop(processor);

    let recordings = factory.recordings();
    assert!(recordings[0].finished);
    assert_eq!(recordings[0].frames.len(), 4);
}
