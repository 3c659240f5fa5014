//! Apache/Nginx access logs (Common and Combined Log Format).

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

pub const EVENT_TYPE: &str = "WebAccess";
pub const EVENT_TYPE_RAW: &str = "WebAccessRaw";

/// `host ident authuser [date] "request" status bytes ["referer" "ua"]`.
fn clf_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(\S+)\s+(\S+)\s+(\S+)\s+\[([^\]]+)\]\s+"([^"]+)"\s+(\d{3})\s+(\d+|-)(?:\s+"([^"]*)"\s+"([^"]*)")?.*$"#,
        )
        .expect("static regex")
    })
}

pub struct WebAccessParser;

impl EventParser for WebAccessParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        base == "access.log"
            || base.starts_with("access.log.")
            || base.contains("apache")
            || base.contains("nginx")
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

            let event = match clf_pattern().captures(truncate_for_regex(&line)) {
                Some(caps) => {
                    let user = match &caps[3] {
                        "-" => "",
                        u => u,
                    };
                    let ts = timestamp::parse_flexible(&caps[4])
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    let status: i64 = caps[6].parse().unwrap_or(0);

                    let mut request = caps[5].split(' ');
                    let method = request.next().unwrap_or("");
                    let uri = request.next().unwrap_or("");

                    Event::new(
                        ts,
                        source.clone(),
                        EVENT_TYPE,
                        line_num,
                        user,
                        &caps[1],
                        format!("{method} {uri} (Status: {status})"),
                        path_str.clone(),
                    )
                }
                None => Event::raw(source.clone(), EVENT_TYPE_RAW, line_num, line, path_str.clone()),
            };

            events.push(event);
        }

        info!(file = %path.display(), events = events.len(), "parsed web access file");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "web-access"
    }
}
