//! Linux syslog (RFC 5424 and RFC 3164 line shapes).

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::lines::LineIter;
use crate::parser::timestamp;
use crate::parser::traits::{base_name_lower, source_label, EventParser, ParseError};
use crate::parser::{truncate_for_regex, CANCEL_CHECK_INTERVAL};

pub const EVENT_TYPE: &str = "Syslog";
pub const EVENT_TYPE_RAW: &str = "SyslogRaw";

/// RFC 5424-ish: `2023-01-01T12:00:00Z hostname app[123]: message`.
fn rfc5424_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))\s+(\S+)\s+([^:]+):\s+(.*)$",
        )
        .expect("static regex")
    })
}

/// RFC 3164: `Jan 01 12:00:00 hostname app[123]: message`. No year.
fn rfc3164_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+([^:]+):\s+(.*)$")
            .expect("static regex")
    })
}

pub struct SyslogParser;

const KNOWN_NAMES: &[&str] = &["syslog", "auth.log", "kern.log", "messages", "user.log"];

impl EventParser for SyslogParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        if KNOWN_NAMES.contains(&base.as_str()) {
            return true;
        }
        // Rotations keep their parser: syslog.1, auth.log.2.
        base.starts_with("syslog.")
            || base.starts_with("auth.log.")
            || base.starts_with("kern.log.")
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();
        let now = Utc::now();
        let mut last_seen: Option<DateTime<Utc>> = None;

        let mut events = Vec::new();
        let mut line_num: i64 = 0;

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }

            let probe = truncate_for_regex(&line);

            let event = if let Some(caps) = rfc5424_pattern().captures(probe) {
                let ts = timestamp::parse_flexible(&caps[1])
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                if ts != DateTime::<Utc>::UNIX_EPOCH {
                    last_seen = Some(ts);
                }
                Event::new(
                    ts,
                    source.clone(),
                    EVENT_TYPE,
                    line_num,
                    "",
                    &caps[2],
                    format!("[{}] {}", &caps[3], &caps[4]),
                    path_str.clone(),
                )
            } else if let Some(caps) = rfc3164_pattern().captures(probe) {
                let ts = timestamp::resolve_without_year(&caps[1], now, last_seen)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                if ts != DateTime::<Utc>::UNIX_EPOCH {
                    last_seen = Some(ts);
                }
                Event::new(
                    ts,
                    source.clone(),
                    EVENT_TYPE,
                    line_num,
                    "",
                    &caps[2],
                    format!("[{}] {}", &caps[3], &caps[4]),
                    path_str.clone(),
                )
            } else {
                Event::raw(source.clone(), EVENT_TYPE_RAW, line_num, line, path_str.clone())
            };

            events.push(event);
        }

        info!(file = %path.display(), events = events.len(), "parsed syslog file");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "syslog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_can_parse_known_names() {
        let cache = HeaderCache::new();
        let parser = SyslogParser;
        assert!(parser.can_parse(Path::new("/var/log/syslog"), &cache));
        assert!(parser.can_parse(Path::new("/var/log/auth.log"), &cache));
        assert!(parser.can_parse(Path::new("/var/log/syslog.1"), &cache));
        assert!(!parser.can_parse(Path::new("/var/log/dmesg"), &cache));
    }

    #[test]
    fn test_rfc5424_line() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "syslog",
            "2023-01-01T12:00:00Z myhost myapp[123]: Test message\n",
        );
        let events = SyslogParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap());
        assert_eq!(event.event_type, "Syslog");
        assert_eq!(event.host, "myhost");
        assert_eq!(event.message, "[myapp[123]] Test message");
        assert_eq!(event.event_id, 1);
    }

    #[test]
    fn test_rfc3164_line_gets_current_year() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "auth.log",
            "Jan 01 12:00:00 oldhost sshd[456]: Failed password\n",
        );
        let events = SyslogParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.host, "oldhost");
        assert_eq!(event.message, "[sshd[456]] Failed password");
        assert_eq!(event.timestamp.month(), 1);
        assert_eq!(event.timestamp.day(), 1);
        assert_eq!(event.timestamp.hour(), 12);
        // Year is inferred from the wall clock; January dates never land
        // in the future, so the seeded year survives.
        let now = Utc::now();
        assert!(event.timestamp.year() == now.year() || event.timestamp.year() == now.year() - 1);
    }

    #[test]
    fn test_unparseable_line_becomes_raw() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "syslog", "complete nonsense\n");
        let events = SyslogParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events[0].event_type, "SyslogRaw");
        assert_eq!(events[0].message, "complete nonsense");
        assert!(events[0].has_sentinel_timestamp());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "syslog",
            "\n2023-01-01T12:00:00Z h a: one\n\n2023-01-01T12:00:01Z h a: two\n",
        );
        let events = SyslogParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 2);
    }
}
