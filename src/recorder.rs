//! Recording sink: writes a span of frames to a destination on its own thread.
//!
//! State machine: `Idle → Recording → Stopping → Idle`.
//!
//! Each recording span gets a dedicated writer thread fed by a channel, so a
//! slow disk never stalls the capture thread. The writer owns the
//! `Stopping → Idle` transition: it drains whatever was queued before the
//! stop, finalizes the file and only then hands pending stop completions to
//! the callback queue.

use std::fmt;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use ppgcam_codec::{FormatDescription, MediaTime, VideoFrame, WriterFactory, WriterSummary};

use crate::dispatch::{Dispatcher, Task};
use crate::error::RecordingError;
use crate::lock;

/// Externally visible recording state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

enum WriterCommand {
    Append(VideoFrame),
    /// Drain and finalize normally.
    Finish,
    /// Finalize after a fatal error; finalize failures are not reported.
    Abort,
}

enum Phase {
    Idle,
    Recording {
        tx: mpsc::Sender<WriterCommand>,
        format: FormatDescription,
    },
    Stopping {
        waiters: Vec<Task>,
    },
}

impl Phase {
    fn state(&self) -> RecordingState {
        match self {
            Self::Idle => RecordingState::Idle,
            Self::Recording { .. } => RecordingState::Recording,
            Self::Stopping { .. } => RecordingState::Stopping,
        }
    }
}

struct Shared {
    phase: Phase,
    destination: Option<PathBuf>,
    last_summary: Option<WriterSummary>,
}

/// Writes frames to a destination while armed.
pub struct RecordingSink {
    shared: Arc<Mutex<Shared>>,
    factory: Arc<dyn WriterFactory>,
    dispatcher: Dispatcher,
    /// Writer threads that may still be running.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RecordingSink {
    pub fn new(factory: Arc<dyn WriterFactory>, dispatcher: Dispatcher) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                phase: Phase::Idle,
                destination: None,
                last_summary: None,
            })),
            factory,
            dispatcher,
            workers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        lock(&self.shared).phase.state()
    }

    /// Destination of the current or most recent recording.
    #[must_use]
    pub fn destination(&self) -> Option<PathBuf> {
        lock(&self.shared).destination.clone()
    }

    /// Summary of the most recent recording that finalized successfully.
    #[must_use]
    pub fn last_recording(&self) -> Option<WriterSummary> {
        lock(&self.shared).last_summary
    }

    /// Frames written by the most recent finalized recording.
    #[must_use]
    pub fn frames_written(&self) -> Option<u64> {
        self.last_recording().map(|s| s.frames_written)
    }

    /// Arm recording. Only valid while idle.
    pub fn start(&self, destination: PathBuf, start_time: MediaTime, format: FormatDescription) {
        let mut shared = lock(&self.shared);
        let state = shared.phase.state();
        if state != RecordingState::Idle {
            self.dispatcher
                .deliver_error(RecordingError::AlreadyActive { state }.into());
            return;
        }

        let (tx, rx) = mpsc::channel();
        let worker = WriterWorker {
            shared: self.shared.clone(),
            factory: self.factory.clone(),
            dispatcher: self.dispatcher.clone(),
            destination: destination.clone(),
            start_time,
            format,
            rx,
        };
        let handle = match thread::Builder::new()
            .name("ppgcam-writer".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.dispatcher
                    .deliver_error(RecordingError::Spawn(e).into());
                return;
            }
        };

        tracing::debug!(destination = %destination.display(), %format, "Recording armed");
        shared.phase = Phase::Recording { tx, format };
        shared.destination = Some(destination);
        shared.last_summary = None;
        drop(shared);

        // Writers that went idle are joined here, never the live one
        let finished: Vec<_> = {
            let mut workers = lock(&self.workers);
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.drain(..).partition(|w| w.is_finished());
            *workers = running;
            workers.push(handle);
            finished
        };
        join_writers(finished);
    }

    /// Queue a frame for the writer. Returns whether it was accepted.
    pub fn append(&self, frame: &VideoFrame) -> bool {
        let mut shared = lock(&self.shared);
        let Phase::Recording { tx, format } = &shared.phase else {
            return false;
        };

        let actual = frame.format();
        if actual != *format {
            let expected = *format;
            let _ = tx.send(WriterCommand::Abort);
            shared.phase = Phase::Stopping {
                waiters: Vec::new(),
            };
            self.dispatcher
                .deliver_error(RecordingError::IncompatibleFrame { expected, actual }.into());
            return false;
        }

        tx.send(WriterCommand::Append(frame.clone())).is_ok()
    }

    /// Request a stop. `completion` runs once on the callback queue after the
    /// recording is finalized, or right away if nothing is recording.
    pub fn stop(&self, completion: Task) {
        let mut shared = lock(&self.shared);
        match std::mem::replace(&mut shared.phase, Phase::Idle) {
            Phase::Idle => {
                drop(shared);
                self.dispatcher.complete(completion);
            }
            Phase::Stopping { mut waiters } => {
                waiters.push(completion);
                shared.phase = Phase::Stopping { waiters };
            }
            Phase::Recording { tx, .. } => {
                if tx.send(WriterCommand::Finish).is_ok() {
                    tracing::debug!("Recording stopping");
                    shared.phase = Phase::Stopping {
                        waiters: vec![completion],
                    };
                } else {
                    // Writer thread is gone; nothing left to finalize
                    drop(shared);
                    self.dispatcher.complete(completion);
                }
            }
        }
    }

    /// Finalize any active recording and wait for the writer thread.
    pub fn shutdown(&self) {
        {
            let mut shared = lock(&self.shared);
            if let Phase::Recording { tx, .. } = &shared.phase {
                let _ = tx.send(WriterCommand::Finish);
                shared.phase = Phase::Stopping {
                    waiters: Vec::new(),
                };
            }
        }
        let workers = std::mem::take(&mut *lock(&self.workers));
        join_writers(workers);
    }
}

fn join_writers(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("Writer thread panicked");
        }
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WriterWorker {
    shared: Arc<Mutex<Shared>>,
    factory: Arc<dyn WriterFactory>,
    dispatcher: Dispatcher,
    destination: PathBuf,
    start_time: MediaTime,
    format: FormatDescription,
    rx: mpsc::Receiver<WriterCommand>,
}

impl WriterWorker {
    fn run(self) {
        let mut writer = match self
            .factory
            .open(&self.destination, self.start_time, &self.format)
        {
            Ok(writer) => writer,
            Err(source) => {
                self.dispatcher.deliver_error(
                    RecordingError::Open {
                        destination: self.destination.clone(),
                        source,
                    }
                    .into(),
                );
                self.close(None);
                return;
            }
        };
        tracing::info!(destination = %self.destination.display(), format = %self.format, "Recording started");

        let mut failed = false;
        while let Ok(command) = self.rx.recv() {
            match command {
                WriterCommand::Append(frame) => {
                    if let Err(e) = writer.append(&frame) {
                        let mut shared = lock(&self.shared);
                        if let Phase::Recording { .. } = shared.phase {
                            shared.phase = Phase::Stopping {
                                waiters: Vec::new(),
                            };
                        }
                        self.dispatcher
                            .deliver_error(RecordingError::Append(e).into());
                        failed = true;
                        break;
                    }
                }
                WriterCommand::Finish => break,
                WriterCommand::Abort => {
                    failed = true;
                    break;
                }
            }
        }

        let summary = match writer.finish() {
            Ok(summary) => Some(summary),
            Err(e) if failed => {
                tracing::debug!(error = %e, "Finalizing aborted recording failed");
                None
            }
            Err(e) => {
                self.dispatcher
                    .deliver_error(RecordingError::Finalize(e).into());
                None
            }
        };
        if let Some(summary) = summary {
            tracing::info!(
                destination = %self.destination.display(),
                frames = summary.frames_written,
                bytes = summary.bytes_written,
                "Recording finished"
            );
        }
        self.close(summary);
    }

    /// Go idle and release any pending stop completions.
    fn close(&self, summary: Option<WriterSummary>) {
        let waiters = {
            let mut shared = lock(&self.shared);
            shared.last_summary = summary;
            match std::mem::replace(&mut shared.phase, Phase::Idle) {
                Phase::Stopping { waiters } => waiters,
                _ => Vec::new(),
            }
        };
        tracing::debug!(destination = %self.destination.display(), "Recording idle");
        for waiter in waiters {
            self.dispatcher.complete(waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ProcessorDelegate, SerialQueue};
    use crate::error::ProcessorError;
    use crate::sample::PixelSample;
    use ppgcam_codec::memory::{FailurePlan, MemoryWriterFactory};
    use ppgcam_codec::PixelFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl ProcessorDelegate for Errors {
        fn on_sample(&self, _sample: PixelSample) {}

        fn on_recording_error(&self, error: &ProcessorError) {
            self.0.lock().unwrap().push(error.to_string());
        }
    }

    struct Harness {
        sink: RecordingSink,
        factory: MemoryWriterFactory,
        queue: Arc<SerialQueue>,
        errors: Arc<Errors>,
    }

    impl Harness {
        fn new(factory: MemoryWriterFactory) -> Self {
            let errors = Arc::new(Errors::default());
            let queue = Arc::new(SerialQueue::new("sink-test").unwrap());
            let weak: Weak<dyn ProcessorDelegate> =
                Arc::downgrade(&errors) as Weak<dyn ProcessorDelegate>;
            let dispatcher = Dispatcher::new(weak, queue.clone());
            let sink = RecordingSink::new(Arc::new(factory.clone()), dispatcher);
            Self {
                sink,
                factory,
                queue,
                errors,
            }
        }

        /// Stop and block until the completion has run.
        fn stop_and_wait(&self) -> usize {
            let fired = Arc::new(AtomicUsize::new(0));
            let counter = fired.clone();
            let (tx, rx) = mpsc::channel();
            self.sink.stop(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }));
            rx.recv().unwrap();
            self.queue.flush();
            fired.load(Ordering::SeqCst)
        }

        fn errors(&self) -> Vec<String> {
            self.queue.flush();
            self.errors.0.lock().unwrap().clone()
        }
    }

    fn format() -> FormatDescription {
        FormatDescription::new(PixelFormat::Rgb, 4, 4)
    }

    fn frame(i: i64) -> VideoFrame {
        VideoFrame::solid(4, 4, PixelFormat::Rgb, [200, 10, 10], MediaTime::new(i, 60))
    }

    #[test]
    fn test_stop_while_idle_completes() {
        let h = Harness::new(MemoryWriterFactory::new());
        assert_eq!(h.stop_and_wait(), 1);
        assert_eq!(h.sink.state(), RecordingState::Idle);
        assert!(h.errors().is_empty());
        assert!(h.factory.recordings().is_empty());
    }

    #[test]
    fn test_records_frames_until_stop() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.sink.start(PathBuf::from("span.y4m"), MediaTime::ZERO, format());
        assert_eq!(h.sink.state(), RecordingState::Recording);
        for i in 0..5 {
            assert!(h.sink.append(&frame(i)));
        }
        assert_eq!(h.stop_and_wait(), 1);

        assert_eq!(h.sink.state(), RecordingState::Idle);
        assert_eq!(h.sink.frames_written(), Some(5));
        assert_eq!(h.sink.destination(), Some(PathBuf::from("span.y4m")));
        let recordings = h.factory.recordings();
        assert!(recordings[0].finished);
        assert_eq!(recordings[0].frames.len(), 5);
        assert!(h.errors().is_empty());
    }

    #[test]
    fn test_frames_after_stop_are_not_recorded() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.sink.start(PathBuf::from("span.y4m"), MediaTime::ZERO, format());
        h.sink.append(&frame(0));

        let (tx, rx) = mpsc::channel();
        h.sink.stop(Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(!h.sink.append(&frame(1)));
        rx.recv().unwrap();
        assert_eq!(h.factory.recordings()[0].frames, vec![MediaTime::new(0, 60)]);
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        h.sink.start(PathBuf::from("b.y4m"), MediaTime::ZERO, format());
        h.stop_and_wait();

        let errors = h.errors();
        assert_eq!(errors, vec!["recording already recording".to_string()]);
        assert_eq!(h.factory.recordings().len(), 1);
        assert_eq!(h.sink.destination(), Some(PathBuf::from("a.y4m")));
    }

    #[test]
    fn test_sequential_spans() {
        let h = Harness::new(MemoryWriterFactory::new());
        for (n, name) in [(2, "one.y4m"), (3, "two.y4m")] {
            h.sink.start(PathBuf::from(name), MediaTime::ZERO, format());
            for i in 0..n {
                h.sink.append(&frame(i));
            }
            h.stop_and_wait();
        }
        let recordings = h.factory.recordings();
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[1].frames.len(), 3);
        assert_eq!(h.sink.frames_written(), Some(3));
    }

    #[test]
    fn test_incompatible_frame_aborts_recording() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        h.sink.append(&frame(0));
        let odd = VideoFrame::solid(8, 8, PixelFormat::Rgb, [0, 0, 0], MediaTime::new(1, 60));
        assert!(!h.sink.append(&odd));
        assert_ne!(h.sink.state(), RecordingState::Recording);

        assert_eq!(h.stop_and_wait(), 1);
        assert_eq!(h.sink.state(), RecordingState::Idle);
        let errors = h.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("incompatible"), "{errors:?}");
    }

    #[test]
    fn test_open_failure_returns_to_idle() {
        let h = Harness::new(MemoryWriterFactory::failing(FailurePlan {
            open: true,
            ..Default::default()
        }));
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        assert_eq!(h.stop_and_wait(), 1);
        assert_eq!(h.sink.state(), RecordingState::Idle);
        let errors = h.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("failed to open a.y4m"), "{errors:?}");
    }

    #[test]
    fn test_append_failure_reports_once() {
        let h = Harness::new(MemoryWriterFactory::failing(FailurePlan {
            append_at: Some(2),
            ..Default::default()
        }));
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        for i in 0..10 {
            h.sink.append(&frame(i));
        }
        assert_eq!(h.stop_and_wait(), 1);
        assert_eq!(h.sink.state(), RecordingState::Idle);
        assert_eq!(h.errors().len(), 1);
        assert_eq!(h.factory.recordings()[0].frames.len(), 2);
    }

    #[test]
    fn test_finalize_failure_still_completes() {
        let h = Harness::new(MemoryWriterFactory::failing(FailurePlan {
            finish: true,
            ..Default::default()
        }));
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        h.sink.append(&frame(0));
        assert_eq!(h.stop_and_wait(), 1);
        let errors = h.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("failed to finalize"), "{errors:?}");
        assert_eq!(h.sink.frames_written(), None);
    }

    #[test]
    fn test_every_stop_caller_is_completed() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = fired.clone();
            h.sink.stop(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        h.sink.shutdown();
        h.queue.flush();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_drop_finalizes_active_recording() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.sink.start(PathBuf::from("a.y4m"), MediaTime::ZERO, format());
        h.sink.append(&frame(0));
        let Harness { sink, factory, .. } = h;
        drop(sink);
        assert!(factory.recordings()[0].finished);
    }
}
