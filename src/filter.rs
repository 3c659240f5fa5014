use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use thiserror::Error;

use crate::event::Event;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(String),
}

#[derive(Debug, Default)]
pub struct FilterStats {
    pub events_scanned: AtomicU64,
    pub events_matched: AtomicU64,
}

/// Regex filter applied to parsed events. An event is retained when the
/// pattern matches any of its `user`, `host`, `message`, or `source`
/// fields. Compiled once per run and shared across workers.
pub struct EventFilter {
    regex: Regex,
    stats: FilterStats,
}

impl EventFilter {
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        let regex = Regex::new(pattern).map_err(|e| FilterError::InvalidRegex(e.to_string()))?;
        Ok(Self {
            regex,
            stats: FilterStats::default(),
        })
    }

    #[inline]
    pub fn matches(&self, event: &Event) -> bool {
        self.stats.events_scanned.fetch_add(1, Ordering::Relaxed);
        let matched = self.regex.is_match(&event.user)
            || self.regex.is_match(&event.host)
            || self.regex.is_match(&event.message)
            || self.regex.is_match(&event.source);
        if matched {
            self.stats.events_matched.fetch_add(1, Ordering::Relaxed);
        }
        matched
    }

    /// (scanned, matched) so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.events_scanned.load(Ordering::Relaxed),
            self.stats.events_matched.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(user: &str, host: &str, message: &str, source: &str) -> Event {
        Event::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            source,
            "Test",
            1,
            user,
            host,
            message,
            "/f",
        )
    }

    #[test]
    fn test_matches_any_of_the_four_fields() {
        let filter = EventFilter::new("needle").unwrap();
        assert!(filter.matches(&event("needle", "", "", "s")));
        assert!(filter.matches(&event("", "needle-host", "", "s")));
        assert!(filter.matches(&event("", "", "a needle here", "s")));
        assert!(filter.matches(&event("", "", "", "needle.log")));
        assert!(!filter.matches(&event("u", "h", "m", "s")));
    }

    #[test]
    fn test_regex_syntax_is_honored() {
        let filter = EventFilter::new(r"^10\.0\.\d+\.\d+$").unwrap();
        assert!(filter.matches(&event("", "10.0.3.7", "", "s")));
        assert!(!filter.matches(&event("", "192.168.0.1", "", "s")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(EventFilter::new("[unclosed").is_err());
    }

    #[test]
    fn test_stats_accumulate() {
        let filter = EventFilter::new("x").unwrap();
        filter.matches(&event("x", "", "", "s"));
        filter.matches(&event("", "", "", "s"));
        let (scanned, matched) = filter.stats();
        assert_eq!(scanned, 2);
        assert_eq!(matched, 1);
    }
}
