use std::path::PathBuf;

use thiserror::Error;

use crate::filter::FilterError;
use crate::output::SinkError;
use crate::parser::ParseError;

/// Crate-level error for the orchestrator and the `App` façade.
///
/// Per-file parser failures never surface as this type directly; they
/// are accumulated during a run and folded into [`Error::Partial`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("input path not found: {0}")]
    InputNotFound(PathBuf),

    #[error("input path is not readable: {path}: {source}")]
    InputUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid filter pattern: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("processing was interrupted")]
    Cancelled,

    #[error("{count} file(s) failed during processing; first error: {first}")]
    Partial { count: usize, first: String },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
