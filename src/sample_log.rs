//! JSON-lines sample log.
//!
//! [`SampleLog`] is a [`ProcessorDelegate`] that buffers samples and writes
//! them in batches of `batch_size` (one second of frames at the nominal
//! rate). Each batch is sorted by timestamp before it is written, one JSON
//! object per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::dispatch::ProcessorDelegate;
use crate::error::ProcessorError;
use crate::lock;
use crate::sample::PixelSample;

struct LogState {
    out: Option<BufWriter<File>>,
    pending: Vec<PixelSample>,
    written: u64,
}

pub struct SampleLog {
    path: PathBuf,
    batch_size: usize,
    state: Mutex<LogState>,
    observer: Option<Arc<dyn ProcessorDelegate>>,
}

impl SampleLog {
    /// Create (or truncate) the log file at `path`.
    pub fn create(path: impl AsRef<Path>, batch_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create sample log {}", path.display()))?;
        let batch_size = batch_size.max(1) as usize;
        Ok(Self {
            path,
            batch_size,
            state: Mutex::new(LogState {
                out: Some(BufWriter::new(file)),
                pending: Vec::with_capacity(batch_size),
                written: 0,
            }),
            observer: None,
        })
    }

    /// Forward every sample and error to `observer` after logging it.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProcessorDelegate>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples written to disk so far.
    #[must_use]
    pub fn samples_written(&self) -> u64 {
        lock(&self.state).written
    }

    /// Write the partial batch, sync and close the file.
    ///
    /// Returns the total number of samples written. Samples arriving after
    /// this are dropped.
    pub fn finish(&self) -> Result<u64> {
        let mut state = lock(&self.state);
        write_batch(&mut state)?;
        if let Some(out) = state.out.take() {
            let file = out
                .into_inner()
                .map_err(|e| e.into_error())
                .context("Failed to flush sample log")?;
            file.sync_all().context("Failed to sync sample log")?;
        }
        tracing::info!(path = %self.path.display(), samples = state.written, "Sample log closed");
        Ok(state.written)
    }

    /// Read a log written by [`SampleLog`].
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<PixelSample>> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open sample log {}", path.display()))?;
        let mut samples = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid sample", path.display(), n + 1))?;
            samples.push(sample);
        }
        Ok(samples)
    }
}

fn write_batch(state: &mut LogState) -> Result<()> {
    if state.pending.is_empty() {
        return Ok(());
    }
    let Some(out) = state.out.as_mut() else {
        state.pending.clear();
        return Ok(());
    };
    state
        .pending
        .sort_by(|a, b| a.presentation_timestamp.total_cmp(&b.presentation_timestamp));
    for sample in &state.pending {
        serde_json::to_writer(&mut *out, sample)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    state.written += state.pending.len() as u64;
    state.pending.clear();
    Ok(())
}

impl ProcessorDelegate for SampleLog {
    fn on_sample(&self, sample: PixelSample) {
        {
            let mut state = lock(&self.state);
            if state.out.is_some() {
                state.pending.push(sample);
                if state.pending.len() >= self.batch_size {
                    if let Err(e) = write_batch(&mut state) {
                        tracing::warn!(path = %self.path.display(), "Failed to write samples: {e:#}");
                    }
                }
            }
        }
        if let Some(observer) = &self.observer {
            observer.on_sample(sample);
        }
    }

    fn on_recording_error(&self, error: &ProcessorError) {
        if let Some(observer) = &self.observer {
            observer.on_recording_error(error);
        }
    }
}
