use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::lines::LineIter;
use super::{HEADER_LINES, MAX_REGEX_INPUT, SNIFF_BUDGET};

/// Process-wide cache of file headers for content-sniffing classifiers.
///
/// Several classifiers may peek at the same file while the registry
/// walks its priority list; caching the first [`HEADER_LINES`] lines
/// (each capped at 64 KiB) keeps that to a single read. The cache is
/// scoped to one processing run and cleared afterwards.
#[derive(Debug, Default)]
pub struct HeaderCache {
    headers: DashMap<PathBuf, Arc<Vec<String>>>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// First lines of the file, from cache or a bounded read. An
    /// unreadable file yields an empty header so classifiers simply
    /// decline it.
    pub fn header(&self, path: &Path) -> Arc<Vec<String>> {
        if let Some(cached) = self.headers.get(path) {
            return Arc::clone(&cached);
        }

        let lines = self.read_header(path);
        let lines = Arc::new(lines);
        self.headers
            .insert(path.to_path_buf(), Arc::clone(&lines));
        lines
    }

    fn read_header(&self, path: &Path) -> Vec<String> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "header peek failed");
                return Vec::new();
            }
        };

        LineIter::new(BufReader::new(file))
            .take(HEADER_LINES)
            .filter_map(|line| line.ok())
            .map(|mut line| {
                if line.len() > MAX_REGEX_INPUT {
                    let mut end = MAX_REGEX_INPUT;
                    while end > 0 && !line.is_char_boundary(end) {
                        end -= 1;
                    }
                    line.truncate(end);
                }
                line
            })
            .collect()
    }

    /// True if any of the needles appears within the sniff budget of the
    /// cached header. This is the primitive behind the content-marker
    /// checks (schema URLs, required JSON field triples, banners).
    pub fn header_contains(&self, path: &Path, needles: &[&str]) -> bool {
        let header = self.header(path);
        let mut budget = SNIFF_BUDGET;
        let mut remaining: Vec<&str> = needles.to_vec();
        for line in header.iter() {
            let window = if line.len() > budget {
                let mut end = budget;
                while end > 0 && !line.is_char_boundary(end) {
                    end -= 1;
                }
                &line[..end]
            } else {
                line.as_str()
            };
            remaining.retain(|needle| !window.contains(needle));
            if remaining.is_empty() {
                return true;
            }
            budget = budget.saturating_sub(line.len() + 1);
            if budget == 0 {
                break;
            }
        }
        false
    }

    /// Drop all cached headers. Called once a processing run completes.
    pub fn clear(&self) {
        self.headers.clear();
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
