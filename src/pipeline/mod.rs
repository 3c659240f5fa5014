//! Concurrent processing pipeline: one walker task enumerates files,
//! N workers parse/filter/sort/write, counters publish lossy progress.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::event::sort_chronologically;
use crate::filter::EventFilter;
use crate::output::Sink;
use crate::parser::{HeaderCache, ParseError, ParserRegistry};

/// Default capacity of the walker → worker path queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Snapshot pushed to the progress listener. Values are monotonically
/// non-decreasing but may skip intermediates under contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub files_processed: u64,
    pub events_processed: u64,
}

/// Counters shared between workers and the orchestrator.
#[derive(Debug, Default)]
struct JobCounters {
    files_processed: AtomicU64,
    files_skipped: AtomicU64,
    events_processed: AtomicU64,
}

/// Everything a worker needs, cheap to clone per task.
struct WorkerContext {
    registry: Arc<ParserRegistry>,
    cache: Arc<HeaderCache>,
    sink: Arc<Mutex<Box<dyn Sink>>>,
    filter: Option<Arc<EventFilter>>,
    counters: Arc<JobCounters>,
    errors: Arc<Mutex<Vec<String>>>,
    progress: Option<mpsc::Sender<Progress>>,
    cancel: CancelToken,
}

impl Clone for WorkerContext {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            sink: Arc::clone(&self.sink),
            filter: self.filter.clone(),
            counters: Arc::clone(&self.counters),
            errors: Arc::clone(&self.errors),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub struct Processor {
    workers: usize,
    registry: Arc<ParserRegistry>,
    cache: Arc<HeaderCache>,
    sink: Arc<Mutex<Box<dyn Sink>>>,
    total_events: Arc<AtomicU64>,
}

impl Processor {
    /// `workers == 0` means one per CPU.
    pub fn new(sink: Arc<Mutex<Box<dyn Sink>>>, workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        Self {
            workers,
            registry: Arc::new(ParserRegistry::new()),
            cache: Arc::new(HeaderCache::new()),
            sink,
            total_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Events written across all `process` calls on this processor.
    pub fn total_events(&self) -> u64 {
        self.total_events.load(Ordering::Acquire)
    }

    /// Process a file or directory tree.
    ///
    /// Cancellation always wins over collected errors; collected errors
    /// surface as [`Error::Partial`] carrying the first message and a
    /// count.
    pub async fn process(
        &self,
        input_path: &Path,
        progress: Option<mpsc::Sender<Progress>>,
        buffer_size: usize,
        filter_pattern: Option<&str>,
        cancel: CancelToken,
    ) -> Result<(), Error> {
        let metadata = tokio::fs::metadata(input_path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::InputNotFound(input_path.to_path_buf())
            } else {
                Error::InputUnreadable {
                    path: input_path.to_path_buf(),
                    source,
                }
            }
        })?;

        // The filter is compiled exactly once, before any worker starts.
        let filter = match filter_pattern.filter(|p| !p.is_empty()) {
            Some(pattern) => Some(Arc::new(EventFilter::new(pattern)?)),
            None => None,
        };

        let context = WorkerContext {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            sink: Arc::clone(&self.sink),
            filter,
            counters: Arc::new(JobCounters::default()),
            errors: Arc::new(Mutex::new(Vec::new())),
            progress,
            cancel,
        };

        let result = if metadata.is_dir() {
            self.process_directory(input_path, buffer_size, &context).await
        } else {
            self.process_single_file(input_path, &context).await
        };

        // Header peeks are only valid for the run that made them.
        self.cache.clear();

        self.total_events.fetch_add(
            context.counters.events_processed.load(Ordering::Relaxed),
            Ordering::AcqRel,
        );

        result?;

        if context.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let errors = context.errors.lock();
        if let Some(first) = errors.first() {
            return Err(Error::Partial {
                count: errors.len(),
                first: first.clone(),
            });
        }

        info!(
            files = context.counters.files_processed.load(Ordering::Relaxed),
            skipped = context.counters.files_skipped.load(Ordering::Relaxed),
            events = context.counters.events_processed.load(Ordering::Relaxed),
            "processing complete"
        );
        Ok(())
    }

    async fn process_single_file(
        &self,
        path: &Path,
        context: &WorkerContext,
    ) -> Result<(), Error> {
        let path = path.to_path_buf();
        let ctx = context.clone();
        if let Err(join_err) = task::spawn_blocking(move || handle_file(&path, &ctx)).await {
            error!(error = %join_err, "file task panicked");
            context.errors.lock().push(join_err.to_string());
        }
        Ok(())
    }

    async fn process_directory(
        &self,
        root: &Path,
        buffer_size: usize,
        context: &WorkerContext,
    ) -> Result<(), Error> {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            buffer_size
        };

        let (tx, rx) = mpsc::channel::<PathBuf>(buffer_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut worker_handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let rx = Arc::clone(&rx);
            let ctx = context.clone();
            worker_handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = ctx.cancel.cancelled() => None,
                            path = rx.recv() => path,
                        }
                    };
                    let Some(path) = next else { break };

                    let blocking_ctx = ctx.clone();
                    let outcome = task::spawn_blocking(move || {
                        handle_file(&path, &blocking_ctx);
                        blocking_ctx.cancel.is_cancelled()
                    })
                    .await;

                    match outcome {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(join_err) => {
                            error!(error = %join_err, "worker file task panicked");
                            break;
                        }
                    }
                }
            }));
        }

        let walk_result = walk_directory(root.to_path_buf(), tx, context.cancel.clone()).await;

        for handle in worker_handles {
            let _ = handle.await;
        }

        walk_result
    }
}

/// Recursive, cancellation-aware directory walk feeding the bounded
/// queue. Unreadable entries are logged and skipped; a cancel during a
/// blocked enqueue aborts the walk.
async fn walk_directory(
    root: PathBuf,
    tx: mpsc::Sender<PathBuf>,
    cancel: CancelToken,
) -> Result<(), Error> {
    let mut stack = vec![root];

    while let Some(dir) = stack.pop() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "error while walking directory");
                    break;
                }
            };

            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "cannot stat entry");
                    continue;
                }
            };

            if file_type.is_dir() {
                stack.push(entry.path());
                continue;
            }

            // Back-pressure point: blocks when workers are behind.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = tx.send(entry.path()) => {
                    if sent.is_err() {
                        // All workers are gone; nothing left to feed.
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Parse, filter, sort, and write one file. Runs on a blocking thread.
fn handle_file(path: &Path, ctx: &WorkerContext) {
    let parser = ctx.registry.select(path, &ctx.cache);

    let mut events = match parser.parse(path, &ctx.cancel) {
        Ok(events) => events,
        Err(ParseError::Unsupported(reason)) => {
            ctx.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
            info!(file = %path.display(), reason, "skipping unsupported file");
            return;
        }
        Err(ParseError::Cancelled(_)) => return,
        Err(err) => {
            error!(file = %path.display(), error = %err, "parse failed");
            ctx.errors.lock().push(err.to_string());
            return;
        }
    };

    if let Some(filter) = &ctx.filter {
        events.retain(|event| filter.matches(event));
    }

    sort_chronologically(&mut events);

    {
        let mut sink = ctx.sink.lock();
        if let Err(err) = sink.write(&events) {
            error!(file = %path.display(), error = %err, "sink write failed");
            ctx.errors.lock().push(err.to_string());
            return;
        }

        // Counter updates and the progress send stay under the sink
        // lock so listener snapshots are totally ordered; without this
        // two workers could publish out of order.
        let files = ctx.counters.files_processed.fetch_add(1, Ordering::Relaxed) + 1;
        let events_total = ctx
            .counters
            .events_processed
            .fetch_add(events.len() as u64, Ordering::Relaxed)
            + events.len() as u64;

        // Progress is lossy on purpose: a slow listener must never
        // stall the pipeline, so a full channel drops the update.
        if let Some(progress) = &ctx.progress {
            let _ = progress.try_send(Progress {
                files_processed: files,
                events_processed: events_total,
            });
        }
    }

    info!(file = %path.display(), events = events.len(), "processed file");
}
