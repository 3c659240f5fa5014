//! Generic JSON event files: arrays or single objects whose fields
//! already resemble the canonical record.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::timestamp;
use crate::parser::traits::{extension_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

pub const EVENT_TYPE_FALLBACK: &str = "Unknown";

pub struct GenericJsonParser;

fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or("")
}

fn record_event(record: &Map<String, Value>, source: &str, path: &str, ordinal: i64) -> Event {
    let ts = record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(timestamp::parse_flexible)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let event_type = match string_field(record, "event_type") {
        "" => EVENT_TYPE_FALLBACK,
        value => value,
    };

    let event_id = record
        .get("event_id")
        .and_then(Value::as_i64)
        .unwrap_or(ordinal);

    Event::new(
        ts,
        source,
        event_type,
        event_id,
        string_field(record, "user"),
        string_field(record, "host"),
        string_field(record, "message"),
        path,
    )
}

impl EventParser for GenericJsonParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        extension_lower(path) == "json"
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let file = File::open(path).map_err(|e| ParseError::open(path, e))?;
        let reader = BufReader::new(file);

        let value: Value = serde_json::from_reader(reader)
            .map_err(|e| ParseError::malformed("JSON", path, e.to_string()))?;

        let mut events = Vec::new();
        match value {
            Value::Array(items) => {
                let mut ordinal: i64 = 0;
                for item in items {
                    ordinal += 1;
                    if ordinal as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                        return Err(ParseError::Cancelled(path.to_path_buf()));
                    }
                    match item {
                        Value::Object(record) => {
                            events.push(record_event(&record, &source, &path_str, ordinal));
                        }
                        other => {
                            warn!(file = %path.display(), "skipping non-object JSON element: {other}");
                        }
                    }
                }
            }
            Value::Object(record) => {
                events.push(record_event(&record, &source, &path_str, 1));
            }
            other => {
                return Err(ParseError::malformed(
                    "JSON",
                    path,
                    format!("unexpected top-level value: {other}"),
                ));
            }
        }

        info!(file = %path.display(), events = events.len(), "parsed JSON file");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_array_of_records() {
        let dir = TempDir::new().unwrap();
        let body = r#"[
            {"timestamp":"2023-04-21T15:30:45Z","event_type":"Login","event_id":7,"user":"alice","host":"ws01","message":"ok"},
            {"message":"no metadata"}
        ]"#;
        let path = fixture(&dir, "events.json", body);
        let events = GenericJsonParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].event_type, "Login");
        assert_eq!(events[0].event_id, 7);
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap()
        );

        assert_eq!(events[1].event_type, "Unknown");
        assert_eq!(events[1].event_id, 2);
        assert!(events[1].has_sentinel_timestamp());
    }

    #[test]
    fn test_single_object() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "one.json", r#"{"event_type":"Snapshot","message":"m"}"#);
        let events = GenericJsonParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "Snapshot");
    }

    #[test]
    fn test_invalid_json_is_parse_failure() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "broken.json", "{not json");
        assert!(GenericJsonParser.parse(&path, &CancelToken::new()).is_err());
    }
}
