use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::event::Event;

use super::cache::HeaderCache;

/// Contract every format parser implements.
///
/// `can_parse` is a cheap classifier: extension, base name, parent
/// directory, and (through the shared [`HeaderCache`]) a bounded peek
/// at the file's leading lines. It must never read a whole file.
///
/// `parse` streams the file and returns the complete per-file batch.
/// A record that cannot be parsed never aborts the file: the parser
/// emits a `<type>Raw` event carrying the line verbatim instead.
pub trait EventParser: Send + Sync {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool;

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError>;

    /// Short name used in dispatch logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Error)]
pub enum ParseError {
    /// The classifier claimed the file but the format is intentionally
    /// unimplemented (Prefetch, Shellbags). Counted as skipped upstream.
    #[error("unsupported file format: {0}")]
    Unsupported(String),

    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("i/o error while reading {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed {kind} file {path}: {detail}")]
    Malformed {
        kind: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("parse of {0} was cancelled")]
    Cancelled(PathBuf),
}

impl ParseError {
    pub fn open(path: &Path, source: io::Error) -> Self {
        Self::Open {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn malformed(kind: &'static str, path: &Path, detail: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// Base name of a path, lowercased, for classifier checks.
pub fn base_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Lowercased extension without the leading dot.
pub fn extension_lower(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Source label for emitted events: the file's base name.
pub fn source_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
