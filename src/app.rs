//! Application façade tying config, sink, and pipeline together. This
//! is the surface external shells (CLI, GUI, control planes) drive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{self, Sink};
use crate::pipeline::{Processor, Progress};

/// Listener invoked with `(files_processed, total_files,
/// events_processed)`. `total_files` is only known for directory runs.
pub type ProgressCallback = Box<dyn Fn(u64, u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Interrupted,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub status: RunStatus,
    pub parsed_events: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct App {
    config: Config,
    sink: Option<Arc<Mutex<Box<dyn Sink>>>>,
    processor: Option<Processor>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sink: None,
            processor: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate paths, create the output writer and the processor.
    pub fn initialize(&mut self) -> Result<()> {
        info!(
            input = %self.config.input_path,
            output = %self.config.output_path,
            format = %self.config.format,
            "initializing"
        );

        let input = Path::new(&self.config.input_path);
        std::fs::metadata(input).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::InputNotFound(input.to_path_buf())
            } else {
                Error::InputUnreadable {
                    path: input.to_path_buf(),
                    source,
                }
            }
        })?;

        let output = Path::new(&self.config.output_path);
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let sink = output::for_format(&self.config.format, output)?;
        let sink = Arc::new(Mutex::new(sink));
        self.processor = Some(Processor::new(Arc::clone(&sink), self.config.workers));
        self.sink = Some(sink);

        Ok(())
    }

    /// Run the pipeline over the configured input.
    ///
    /// Cancellation yields `interrupted` with the events counted so
    /// far; collected per-file errors yield `error` carrying the first
    /// message; otherwise `success`.
    pub async fn process(
        &self,
        cancel: CancelToken,
        progress_callback: Option<ProgressCallback>,
    ) -> ProcessStatus {
        let started = Instant::now();
        let processor = match self.processor.as_ref() {
            Some(processor) => processor,
            None => {
                return ProcessStatus {
                    status: RunStatus::Error,
                    parsed_events: 0,
                    duration_ms: 0,
                    error: Some("App::initialize was not called".to_string()),
                };
            }
        };

        let input = PathBuf::from(&self.config.input_path);

        // Directory runs pre-count files so the listener can report a
        // denominator; the count races with filesystem changes, which
        // listeners must tolerate.
        let total_files = match std::fs::metadata(&input) {
            Ok(meta) if meta.is_dir() => match count_files(&input) {
                Ok(count) => {
                    info!(total_files = count, "pre-counted input files");
                    count
                }
                Err(err) => {
                    warn!(error = %err, "failed to pre-count files");
                    0
                }
            },
            _ => 0,
        };

        // The relay drains pipeline progress without ever blocking it.
        let (progress_tx, mut progress_rx) = mpsc::channel::<Progress>(10);
        let relay = progress_callback.map(|callback| {
            tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    callback(progress.files_processed, total_files, progress.events_processed);
                }
            })
        });

        let filter = if self.config.filter_pattern.is_empty() {
            None
        } else {
            Some(self.config.filter_pattern.as_str())
        };

        let result = processor
            .process(
                &input,
                Some(progress_tx),
                self.config.buffer_size,
                filter,
                cancel,
            )
            .await;

        if let Some(relay) = relay {
            let _ = relay.await;
        }

        let parsed_events = processor.total_events();
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(parsed_events, duration_ms, "processing succeeded");
                ProcessStatus {
                    status: RunStatus::Success,
                    parsed_events,
                    duration_ms,
                    error: None,
                }
            }
            Err(Error::Cancelled) => {
                info!(parsed_events, "processing was interrupted");
                ProcessStatus {
                    status: RunStatus::Interrupted,
                    parsed_events,
                    duration_ms,
                    error: Some("processing was interrupted".to_string()),
                }
            }
            Err(err) => ProcessStatus {
                status: RunStatus::Error,
                parsed_events,
                duration_ms,
                error: Some(err.to_string()),
            },
        }
    }

    /// Flush and close the sink.
    pub fn cleanup(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.take() {
            sink.lock().close()?;
        }
        self.processor = None;
        Ok(())
    }
}

/// Recursive file count for progress denominators.
fn count_files(root: &Path) -> std::io::Result<u64> {
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}
