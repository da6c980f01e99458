//! Ordered, non-blocking delivery of samples and errors to the consumer.
//!
//! The processor never calls its delegate directly. Every sample, error and
//! stop completion is boxed into a [`Task`] and submitted to a
//! [`CallbackQueue`] chosen by the caller, which runs tasks one at a time in
//! submission order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::runtime::Handle;

use crate::error::ProcessorError;
use crate::lock;
use crate::sample::PixelSample;

/// A unit of work for a callback queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that runs submitted tasks serially, in FIFO order.
///
/// `submit` must not block on the task running.
pub trait CallbackQueue: Send + Sync {
    fn submit(&self, task: Task);
}

/// Consumer of processor output.
pub trait ProcessorDelegate: Send + Sync {
    /// Called once per processed frame, in frame arrival order.
    fn on_sample(&self, sample: PixelSample);

    /// Called for dropped frames, timestamp regressions and recording failures.
    fn on_recording_error(&self, _error: &ProcessorError) {}
}

/// Runs a task, containing any panic it raises.
fn run_guarded(label: &str, task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!(queue = label, "Callback panicked; continuing with next task");
    }
}

/// A callback queue backed by one dedicated thread.
pub struct SerialQueue {
    label: String,
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl SerialQueue {
    /// Spawn the queue's thread, named after `label`.
    pub fn new(label: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let thread_label = label.to_string();
        let worker = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    run_guarded(&thread_label, task);
                }
                tracing::debug!(queue = %thread_label, "Callback queue drained");
            })?;

        Ok(Self {
            label: label.to_string(),
            worker_id: worker.thread().id(),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block until every task submitted before this call has run.
    ///
    /// Returns immediately when called from the queue's own thread.
    pub fn flush(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel::<()>();
        self.submit(Box::new(move || {
            let _ = done_tx.send(());
        }));
        // Err means the queue is shut down; nothing left to wait for
        let _ = done_rx.recv();
    }

    /// Stop accepting tasks, run what is queued and join the thread.
    pub fn shutdown(&self) {
        lock(&self.tx).take();
        if thread::current().id() == self.worker_id {
            return;
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl CallbackQueue for SerialQueue {
    fn submit(&self, task: Task) {
        let tx = lock(&self.tx);
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(task).is_err() {
                    tracing::warn!(queue = %self.label, "Callback queue thread exited, task dropped");
                }
            }
            None => tracing::debug!(queue = %self.label, "Callback queue shut down, task dropped"),
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A callback queue backed by a tokio task.
pub struct TokioQueue {
    tx: tokio::sync::mpsc::UnboundedSender<Task>,
}

impl TokioQueue {
    /// Spawn the consumer task on `handle`.
    pub fn new(handle: &Handle) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                run_guarded("tokio", task);
            }
        });
        Self { tx }
    }

    /// Spawn on the ambient runtime. Panics outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(&Handle::current())
    }
}

impl CallbackQueue for TokioQueue {
    fn submit(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::warn!("Tokio callback queue closed, task dropped");
        }
    }
}

/// Routes processor output to a weakly held delegate through a queue.
#[derive(Clone)]
pub struct Dispatcher {
    delegate: Weak<dyn ProcessorDelegate>,
    queue: Arc<dyn CallbackQueue>,
}

impl Dispatcher {
    pub fn new(delegate: Weak<dyn ProcessorDelegate>, queue: Arc<dyn CallbackQueue>) -> Self {
        Self { delegate, queue }
    }

    /// Queue one sample for the delegate.
    pub fn deliver(&self, sample: PixelSample) {
        let delegate = self.delegate.clone();
        self.queue.submit(Box::new(move || {
            if let Some(delegate) = delegate.upgrade() {
                delegate.on_sample(sample);
            }
        }));
    }

    /// Log and queue one error for the delegate.
    pub fn deliver_error(&self, error: ProcessorError) {
        tracing::warn!(%error, "Processor error");
        let delegate = self.delegate.clone();
        self.queue.submit(Box::new(move || {
            if let Some(delegate) = delegate.upgrade() {
                delegate.on_recording_error(&error);
            }
        }));
    }

    /// Queue a stop completion. Runs even if the delegate is gone.
    pub fn complete(&self, completion: Task) {
        self.queue.submit(completion);
    }
}
