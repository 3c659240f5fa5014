//! macOS sources: unified log exports (`log show`), install.log, and
//! legacy Apple System Log text.

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

pub const UNIFIED_LOG: &str = "UnifiedLog";
pub const UNIFIED_LOG_RAW: &str = "UnifiedLogRaw";
pub const INSTALL_LOG: &str = "InstallLog";
pub const INSTALL_LOG_RAW: &str = "InstallLogRaw";
pub const ASL: &str = "ASL";
pub const ASL_RAW: &str = "ASLRaw";

/// `2023-04-21 15:30:45.123456-0700 host process[pid]: (subsystem) msg`
fn unified_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:[+-]\d{4})?)\s+(\S+)\s+([^\[]+)\[(\d+)\]:\s+(?:\(([^)]+)\)\s+)?(.*)$",
        )
        .expect("static regex")
    })
}

/// install.log: `2023-04-21 15:30:45-07 host process[pid]: msg`, with
/// a two-digit timezone.
fn install_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})([+-]\d{2})\s+(\S+)\s+([^\[]+)\[(\d+)\]:\s+(.*)$",
        )
        .expect("static regex")
    })
}

/// ASL: `Apr 21 15:30:45 host process[pid] <Notice>: msg`
fn asl_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+([^\[]+)\[(\d+)\]\s+<([^>]+)>:\s+(.*)$",
        )
        .expect("static regex")
    })
}

/// ASL without a PID: `Apr 21 15:30:45 host process <Notice>: msg`
fn asl_no_pid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+(\S+)\s+<([^>]+)>:\s+(.*)$",
        )
        .expect("static regex")
    })
}

fn parse_unified_timestamp(token: &str) -> Option<DateTime<Utc>> {
    // Offsets in unified logs are packed (-0700); parse_flexible covers
    // both the offset-carrying and naive variants.
    timestamp::parse_flexible(token)
}

// ── Unified log ─────────────────────────────────────────────────

pub struct MacUnifiedLogParser;

impl EventParser for MacUnifiedLogParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        if base.contains("unified")
            || base.contains("logshow")
            || base.contains("log_show")
            || base.starts_with("system_logs")
        {
            return true;
        }
        let header = cache.header(path);
        header
            .iter()
            .take(10)
            .any(|line| unified_pattern().is_match(truncate_for_regex(line)))
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let mut line_num: i64 = 0;
        let mut parsed = 0usize;
        let mut raw = 0usize;

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }

            let event = match unified_pattern().captures(truncate_for_regex(&line)) {
                Some(caps) => {
                    let ts = parse_unified_timestamp(&caps[1])
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    let process = caps[3].trim();
                    let pid = &caps[4];
                    let message = match caps.get(5) {
                        Some(subsystem) => format!(
                            "[{process}({pid})] ({}) {}",
                            subsystem.as_str(),
                            &caps[6]
                        ),
                        None => format!("[{process}({pid})] {}", &caps[6]),
                    };
                    parsed += 1;
                    Event::new(
                        ts,
                        source.clone(),
                        UNIFIED_LOG,
                        line_num,
                        "",
                        &caps[2],
                        message,
                        path_str.clone(),
                    )
                }
                None => {
                    raw += 1;
                    Event::raw(source.clone(), UNIFIED_LOG_RAW, line_num, line, path_str.clone())
                }
            };

            events.push(event);
        }

        info!(file = %path.display(), parsed, raw, total = events.len(), "parsed macOS unified log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "macos-unified"
    }
}

// ── install.log ─────────────────────────────────────────────────

pub struct MacInstallLogParser;

impl EventParser for MacInstallLogParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        base == "install.log" || base.starts_with("install.log.") || base.contains("installer.log")
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let mut line_num: i64 = 0;
        let mut parsed = 0usize;
        let mut raw = 0usize;

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
            let event = if let Some(caps) = install_pattern().captures(probe) {
                // `-07` becomes `-0700` for a regular offset parse.
                let ts = timestamp::parse_flexible(&format!("{} {}00", &caps[1], &caps[2]))
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                parsed += 1;
                Event::new(
                    ts,
                    source.clone(),
                    INSTALL_LOG,
                    line_num,
                    "",
                    &caps[3],
                    format!("[{}({})] {}", caps[4].trim(), &caps[5], &caps[6]),
                    path_str.clone(),
                )
            } else if let Some(caps) = unified_pattern().captures(probe) {
                // Some install logs use the unified shape.
                let ts = parse_unified_timestamp(&caps[1])
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                parsed += 1;
                Event::new(
                    ts,
                    source.clone(),
                    INSTALL_LOG,
                    line_num,
                    "",
                    &caps[2],
                    format!("[{}({})] {}", caps[3].trim(), &caps[4], &caps[6]),
                    path_str.clone(),
                )
            } else {
                raw += 1;
                Event::raw(source.clone(), INSTALL_LOG_RAW, line_num, line, path_str.clone())
            };

            events.push(event);
        }

        info!(file = %path.display(), parsed, raw, total = events.len(), "parsed macOS install log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "macos-install"
    }
}

// ── ASL ─────────────────────────────────────────────────────────

pub struct MacAslParser;

impl EventParser for MacAslParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        if base == "system.log"
            || base.starts_with("system.log.")
            || base.contains("asl")
            || base == "secure.log"
            || base.starts_with("secure.log.")
        {
            return true;
        }
        let header = cache.header(path);
        header.iter().take(10).any(|line| {
            let probe = truncate_for_regex(line);
            asl_pattern().is_match(probe) || asl_no_pid_pattern().is_match(probe)
        })
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();
        let now = Utc::now();
        let mut last_seen: Option<DateTime<Utc>> = None;

        let mut events = Vec::new();
        let mut line_num: i64 = 0;
        let mut parsed = 0usize;
        let mut raw = 0usize;

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
            let event = if let Some(caps) = asl_pattern().captures(probe) {
                let ts = timestamp::resolve_without_year(&caps[1], now, last_seen)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                if ts != DateTime::<Utc>::UNIX_EPOCH {
                    last_seen = Some(ts);
                }
                parsed += 1;
                Event::new(
                    ts,
                    source.clone(),
                    ASL,
                    line_num,
                    "",
                    &caps[2],
                    format!("[{}({})] <{}> {}", caps[3].trim(), &caps[4], &caps[5], &caps[6]),
                    path_str.clone(),
                )
            } else if let Some(caps) = asl_no_pid_pattern().captures(probe) {
                let ts = timestamp::resolve_without_year(&caps[1], now, last_seen)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                if ts != DateTime::<Utc>::UNIX_EPOCH {
                    last_seen = Some(ts);
                }
                parsed += 1;
                Event::new(
                    ts,
                    source.clone(),
                    ASL,
                    line_num,
                    "",
                    &caps[2],
                    format!("[{}] <{}> {}", caps[3].trim(), &caps[4], &caps[5]),
                    path_str.clone(),
                )
            } else {
                raw += 1;
                Event::raw(source.clone(), ASL_RAW, line_num, line, path_str.clone())
            };

            events.push(event);
        }

        info!(file = %path.display(), parsed, raw, total = events.len(), "parsed macOS ASL log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "macos-asl"
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
    fn test_unified_line_with_subsystem() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "unified_export.log",
            "2023-04-21 15:30:45.123456-0700  localhost kernel[0]: (AppleUSBHostController) port reset\n",
        );
        let events = MacUnifiedLogParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.event_type, "UnifiedLog");
        assert_eq!(event.host, "localhost");
        assert_eq!(event.message, "[kernel(0)] (AppleUSBHostController) port reset");
        // -0700 normalises to UTC.
        assert_eq!(event.timestamp.hour(), 22);
    }

    #[test]
    fn test_unified_content_sniff() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "export.txt",
            "2023-04-21 15:30:45.000000-0700  mac Safari[220]: started\n",
        );
        let cache = HeaderCache::new();
        assert!(MacUnifiedLogParser.can_parse(&path, &cache));
    }

    #[test]
    fn test_install_log_short_timezone() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "install.log",
            "2023-04-21 15:30:45-07 localhost softwareupdate[1234]: Download complete\n",
        );
        let events = MacInstallLogParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.event_type, "InstallLog");
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2023, 4, 21, 22, 30, 45).unwrap()
        );
        assert_eq!(event.message, "[softwareupdate(1234)] Download complete");
    }

    #[test]
    fn test_asl_line_with_level() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "system.log",
            "Apr 21 15:30:45 macbook loginwindow[88] <Notice>: Login Window Started\n",
        );
        let events = MacAslParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.event_type, "ASL");
        assert_eq!(event.host, "macbook");
        assert_eq!(event.message, "[loginwindow(88)] <Notice> Login Window Started");
        assert_eq!(event.timestamp.month(), 4);
        assert_eq!(event.timestamp.day(), 21);
    }

    #[test]
    fn test_asl_without_pid() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "system.log",
            "Apr 21 15:30:45 macbook configd <Info>: network changed\n",
        );
        let events = MacAslParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events[0].message, "[configd] <Info> network changed");
    }

    #[test]
    fn test_raw_fallbacks() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "install.log", "--- separator ---\n");
        let events = MacInstallLogParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events[0].event_type, "InstallLogRaw");
        assert!(events[0].has_sentinel_timestamp());
    }
}
