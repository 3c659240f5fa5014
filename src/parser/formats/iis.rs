//! Microsoft IIS W3C Extended Log Format.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::lines::LineIter;
use crate::parser::timestamp;
use crate::parser::traits::{base_name_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

pub const EVENT_TYPE: &str = "IISAccess";

pub struct IisParser;

impl EventParser for IisParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        let full = path.to_string_lossy().to_lowercase();
        if base.starts_with("u_ex") && base.ends_with(".log") {
            return true;
        }
        (full.contains("inetpub") || full.contains("w3svc")) && base.ends_with(".log")
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let mut line_num: i64 = 0;
        let mut skipped = 0usize;

        let mut field_index: HashMap<String, usize> = HashMap::new();

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }

            if let Some(directive) = line.strip_prefix('#') {
                if let Some(fields) = directive.strip_prefix("Fields:") {
                    field_index = fields
                        .split_whitespace()
                        .enumerate()
                        .map(|(i, name)| (name.to_string(), i))
                        .collect();
                }
                // #Software:, #Version:, #Date: carry no events.
                skipped += 1;
                continue;
            }

            if field_index.is_empty() {
                skipped += 1;
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < field_index.len() {
                skipped += 1;
                continue;
            }

            let get = |name: &str| -> &str {
                field_index
                    .get(name)
                    .and_then(|&i| fields.get(i))
                    .copied()
                    .filter(|v| *v != "-")
                    .unwrap_or("")
            };

            let date = get("date");
            let time = get("time");
            let ts = if date.is_empty() || time.is_empty() {
                DateTime::<Utc>::UNIX_EPOCH
            } else {
                timestamp::parse_flexible(&format!("{date} {time}"))
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            };

            let method = get("cs-method");
            let uri_stem = get("cs-uri-stem");
            let uri_query = get("cs-uri-query");
            let status = get("sc-status");
            let sub_status = get("sc-substatus");
            let win32_status = get("sc-win32-status");
            let time_taken: i64 = get("time-taken").parse().unwrap_or(0);
            let user = get("cs-username").to_string();
            let mut user_agent = get("cs(User-Agent)").to_string();
            let client_ip = get("c-ip");
            let server_ip = get("s-ip");
            let server_port = get("s-port");

            let mut parts = vec![format!("{method} {uri_stem}")];
            if !uri_query.is_empty() {
                parts.push(format!("?{uri_query}"));
            }
            let mut status_part = format!("(Status: {})", status.parse::<i64>().unwrap_or(0));
            if !sub_status.is_empty() && sub_status != "0" {
                status_part = format!(
                    "(Status: {}.{})",
                    status.parse::<i64>().unwrap_or(0),
                    sub_status
                );
            }
            parts.push(status_part);
            if time_taken > 0 {
                parts.push(format!("[{time_taken}ms]"));
            }
            if !win32_status.is_empty() && win32_status != "0" {
                parts.push(format!("Win32: {win32_status}"));
            }
            if !user_agent.is_empty() {
                if user_agent.len() > 100 {
                    user_agent.truncate(100);
                    user_agent.push_str("...");
                }
                parts.push(format!("UA: {user_agent}"));
            }

            let host = if !server_ip.is_empty() && !server_port.is_empty() {
                format!("{client_ip} -> {server_ip}:{server_port}")
            } else if !server_ip.is_empty() {
                format!("{client_ip} -> {server_ip}")
            } else {
                client_ip.to_string()
            };

            events.push(Event::new(
                ts,
                source.clone(),
                EVENT_TYPE,
                line_num,
                user,
                host,
                parts.join(" "),
                path_str.clone(),
            ));
        }

        debug!(file = %path.display(), skipped, "IIS directive/malformed lines skipped");
        info!(file = %path.display(), events = events.len(), "parsed IIS log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "iis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
#Software: Microsoft Internet Information Services 10.0
#Version: 1.0
#Date: 2023-04-21 15:30:45
#Fields: date time s-ip cs-method cs-uri-stem cs-uri-query s-port cs-username c-ip cs(User-Agent) sc-status sc-substatus sc-win32-status time-taken
2023-04-21 15:30:45 10.0.0.1 GET /default.htm - 80 - 192.168.1.50 Mozilla/5.0 200 0 0 120
2023-04-21 15:30:46 10.0.0.1 POST /login.aspx user=x 80 admin 192.168.1.51 curl/8.0 401 2 5 15
";

    fn fixture(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_can_parse_iis_names() {
        let cache = HeaderCache::new();
        assert!(IisParser.can_parse(Path::new("u_ex230421.log"), &cache));
        assert!(IisParser.can_parse(Path::new("/inetpub/logs/site1.log"), &cache));
        assert!(IisParser.can_parse(Path::new("/logs/W3SVC1/ex23.log"), &cache));
        assert!(!IisParser.can_parse(Path::new("/var/log/app.log"), &cache));
    }

    #[test]
    fn test_parses_w3c_fields() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "u_ex230421.log");
        let events = IisParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.event_type, "IISAccess");
        assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap());
        assert_eq!(first.user, "");
        assert_eq!(first.host, "192.168.1.50 -> 10.0.0.1:80");
        assert!(first.message.contains("GET /default.htm"));
        assert!(first.message.contains("(Status: 200)"));
        assert!(first.message.contains("[120ms]"));

        let second = &events[1];
        assert_eq!(second.user, "admin");
        assert!(second.message.contains("?user=x"));
        assert!(second.message.contains("(Status: 401.2)"));
        assert!(second.message.contains("Win32: 5"));
    }

    #[test]
    fn test_data_before_fields_directive_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u_ex1.log");
        std::fs::write(&path, "2023-04-21 15:30:45 GET /x 200\n").unwrap();
        let events = IisParser.parse(&path, &CancelToken::new()).unwrap();
        assert!(events.is_empty());
    }
}
