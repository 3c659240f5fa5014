pub mod cache;
pub mod formats;
pub mod lines;
pub mod registry;
pub mod timestamp;
pub mod traits;

pub use cache::HeaderCache;
pub use registry::ParserRegistry;
pub use traits::{EventParser, ParseError};

/// Hard cap on a single text line; longer lines are truncated.
pub const MAX_LINE_SIZE: usize = 1_048_576; // 1 MiB

/// Cap applied before a line is handed to a regex, bounding worst-case
/// backtracking on adversarial input.
pub const MAX_REGEX_INPUT: usize = 65_536; // 64 KiB

/// Number of leading lines kept in the header cache for classifiers.
pub const HEADER_LINES: usize = 50;

/// Content-sniffing classifiers look at most this far into a file.
pub const SNIFF_BUDGET: usize = 4_096;

/// Parser loops poll the cancellation flag once per this many records.
pub const CANCEL_CHECK_INTERVAL: usize = 4_096;

/// Truncate a line for regex matching, respecting UTF-8 boundaries.
pub fn truncate_for_regex(line: &str) -> &str {
    if line.len() <= MAX_REGEX_INPUT {
        return line;
    }
    let mut end = MAX_REGEX_INPUT;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_line_untouched() {
        assert_eq!(truncate_for_regex("hello"), "hello");
    }

    #[test]
    fn test_truncate_caps_long_line() {
        let long = "x".repeat(MAX_REGEX_INPUT + 100);
        assert_eq!(truncate_for_regex(&long).len(), MAX_REGEX_INPUT);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // Fill up to the cap, then place a multi-byte char across it.
        let mut line = "a".repeat(MAX_REGEX_INPUT - 1);
        line.push('é'); // two bytes, straddles the cap
        line.push_str("tail");
        let truncated = truncate_for_regex(&line);
        assert!(truncated.len() <= MAX_REGEX_INPUT);
        assert!(truncated.chars().all(|c| c == 'a'));
    }
}
