pub mod csv_sink;
pub mod jsonl;
pub mod sqlite;

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::event::Event;

pub use csv_sink::CsvSink;
pub use jsonl::JsonlSink;
pub use sqlite::SqliteSink;

/// Flush/commit cadence shared by all sinks.
pub const FLUSH_INTERVAL: usize = 10_000;

/// Write-side buffer size for the text sinks.
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("output i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Streaming event consumer producing one output artifact.
///
/// Callers serialize access (the pipeline wraps the sink in a mutex);
/// implementations may buffer but must preserve the order batches
/// arrive in, and must not roll back events already accepted when a
/// later write fails.
pub trait Sink: Send {
    fn write(&mut self, events: &[Event]) -> Result<(), SinkError>;

    /// Flush buffers, finalize indices, release handles. Idempotence is
    /// not required; callers invoke it once.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Construct the sink for a (lowercased) format name.
pub fn for_format(format: &str, output_path: &Path) -> Result<Box<dyn Sink>, SinkError> {
    match format.to_lowercase().as_str() {
        "jsonl" => Ok(Box::new(JsonlSink::create(output_path)?)),
        "csv" => Ok(Box::new(CsvSink::create(output_path)?)),
        "sqlite" => Ok(Box::new(SqliteSink::create(output_path)?)),
        other => Err(SinkError::UnsupportedFormat(other.to_string())),
    }
}
