//! Text-based Windows servicing logs (CBS, WindowsUpdate, setupapi, DISM).

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

pub const EVENT_TYPE: &str = "WindowsLog";
pub const EVENT_TYPE_RAW: &str = "WindowsLogRaw";

/// CBS shape: `2023-04-21 15:30:45, Info   Cbs    message`.
fn comma_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}),\s+(\S+)\s+(.*)$").expect("static regex")
    })
}

/// Slash-date variant seen in older WindowsUpdate logs.
fn slash_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+(.*)$").expect("static regex")
    })
}

pub struct WindowsTextParser;

impl EventParser for WindowsTextParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        base == "cbs.log"
            || base.contains("windowsupdate")
            || base.contains("setupapi")
            || base.contains("dism")
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

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
            let caps = comma_pattern()
                .captures(probe)
                .or_else(|| slash_pattern().captures(probe));

            let event = match caps {
                Some(caps) => {
                    let ts = timestamp::parse_flexible(&caps[1])
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    Event::new(
                        ts,
                        source.clone(),
                        EVENT_TYPE,
                        line_num,
                        "",
                        "",
                        format!("[{}] {}", &caps[2], &caps[3]),
                        path_str.clone(),
                    )
                }
                None => Event::raw(source.clone(), EVENT_TYPE_RAW, line_num, line, path_str.clone()),
            };

            events.push(event);
        }

        info!(file = %path.display(), events = events.len(), "parsed Windows text log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "windows-text"
    }
}
