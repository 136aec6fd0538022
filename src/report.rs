//! Observational reporting hooks for running pipelines.
//!
//! A [`Reporter`] receives one [`StageEvent`] per stage per tick in lock-step
//! runs and one per stage completion in dataflow runs. Reporters never affect
//! scheduling.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One unit of observed stage activity
#[derive(Debug, Clone, Copy)]
pub struct StageEvent<'a> {
    /// 1-based position of the stage in its pipeline
    pub stage_id: usize,
    pub stage: &'a str,
    /// Tick number (lock-step) or item count (dataflow)
    pub sequence: u64,
    pub activity: &'a str,
    /// Time since the run started
    pub elapsed: Duration,
}

/// Receiver of stage activity
pub trait Reporter: Send + Sync {
    /// Called once per run, before any stage does work
    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Record one event
    fn record(&self, event: &StageEvent<'_>);

    /// Called once after every stage has exited
    fn on_finish(&self, _summary: &str) {}
}

/// Reporter that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn record(&self, event: &StageEvent<'_>) {
        tracing::debug!(
            stage_id = event.stage_id,
            stage = event.stage,
            sequence = event.sequence,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "{}",
            event.activity
        );
    }

    fn on_finish(&self, summary: &str) {
        tracing::info!("{}", summary);
    }
}

/// Reporter that appends one line per event to a log file
///
/// The file is created (truncating any previous content) in
/// [`Reporter::on_start`].
#[derive(Debug)]
pub struct FileReporter {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileReporter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        let mut writer = self.writer.lock();
        if let Some(out) = writer.as_mut() {
            if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                tracing::warn!(path = %self.path.display(), "Failed to write log line: {}", e);
            }
        }
    }
}

impl Reporter for FileReporter {
    fn on_start(&self) -> Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        writeln!(out, "Pipeline execution started")?;
        out.flush()?;
        *self.writer.lock() = Some(out);
        tracing::info!(path = %self.path.display(), "Pipeline log opened");
        Ok(())
    }

    fn record(&self, event: &StageEvent<'_>) {
        self.write_line(&format!(
            "[{:.3}] Stage {}, Tick {}: {}",
            event.elapsed.as_secs_f64(),
            event.stage_id,
            event.sequence,
            event.activity
        ));
    }

    fn on_finish(&self, summary: &str) {
        self.write_line(&format!("Pipeline execution completed. {summary}"));
        self.writer.lock().take();
    }
}
