//! Windows Event Log binary files (`.evtx`).

use std::path::Path;

use evtx::EvtxParser as EvtxFile;
use serde_json::Value;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::traits::{extension_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

pub const EVENT_TYPE_FALLBACK: &str = "WindowsEvent";

pub struct EvtxParser;

/// EVTX record values may appear either as bare scalars or wrapped in a
/// `{"#text": ...}` object when the element carries attributes.
fn unwrap_text(value: &Value) -> &Value {
    value.get("#text").unwrap_or(value)
}

fn string_at<'a>(system: &'a Value, key: &str) -> &'a str {
    system
        .get(key)
        .map(unwrap_text)
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn int_at(system: &Value, key: &str) -> i64 {
    let value = match system.get(key) {
        Some(v) => unwrap_text(v),
        None => return 0,
    };
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

impl EventParser for EvtxParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        extension_lower(path) == "evtx"
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut parser = EvtxFile::from_path(path)
            .map_err(|e| ParseError::malformed("EVTX", path, e.to_string()))?;

        let mut events = Vec::new();
        let mut record_errors = 0usize;

        for (index, record) in parser.records_json_value().enumerate() {
            if index % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            let record = match record {
                Ok(r) => r,
                Err(err) => {
                    // A torn chunk loses its records but not the file.
                    record_errors += 1;
                    warn!(file = %path.display(), error = %err, "skipping unreadable EVTX record");
                    continue;
                }
            };

            let root = &record.data;
            let system = root.pointer("/Event/System").cloned().unwrap_or(Value::Null);

            let event_id = int_at(&system, "EventID");
            let channel = string_at(&system, "Channel");
            let provider = system
                .pointer("/Provider/#attributes/Name")
                .and_then(Value::as_str)
                .unwrap_or("");
            let computer = string_at(&system, "Computer");
            let user = system
                .pointer("/Security/#attributes/UserID")
                .and_then(Value::as_str)
                .unwrap_or("");
            let level = string_at(&system, "Level");

            let event_type = if channel.is_empty() {
                EVENT_TYPE_FALLBACK.to_string()
            } else {
                channel.to_string()
            };

            let mut message = format!("Event ID: {event_id}");
            if !level.is_empty() {
                message = format!("[{level}] {message}");
            }
            if !provider.is_empty() {
                message = format!("{message} (Provider: {provider})");
            }

            events.push(Event::new(
                record.timestamp,
                source.clone(),
                event_type,
                event_id,
                user,
                computer,
                message,
                path_str.clone(),
            ));
        }

        info!(
            file = %path.display(),
            events = events.len(),
            record_errors,
            "parsed EVTX file"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "evtx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_parse_extension_only() {
        let cache = HeaderCache::new();
        assert!(EvtxParser.can_parse(Path::new("Security.evtx"), &cache));
        assert!(EvtxParser.can_parse(Path::new("SYSTEM.EVTX"), &cache));
        assert!(!EvtxParser.can_parse(Path::new("Security.evt"), &cache));
    }

    #[test]
    fn test_garbage_file_is_parse_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.evtx");
        std::fs::write(&path, b"not an evtx file at all").unwrap();
        assert!(EvtxParser.parse(&path, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_unwrap_text_helper() {
        let wrapped: Value = serde_json::json!({"#text": "4624"});
        assert_eq!(unwrap_text(&wrapped).as_str(), Some("4624"));
        let bare: Value = serde_json::json!(4624);
        assert_eq!(unwrap_text(&bare).as_i64(), Some(4624));
    }

    #[test]
    fn test_int_extraction_accepts_both_shapes() {
        let system = serde_json::json!({"EventID": {"#text": "4688"}});
        assert_eq!(int_at(&system, "EventID"), 4688);
        let system = serde_json::json!({"EventID": 4688});
        assert_eq!(int_at(&system, "EventID"), 4688);
        let system = serde_json::json!({});
        assert_eq!(int_at(&system, "EventID"), 0);
    }
}
