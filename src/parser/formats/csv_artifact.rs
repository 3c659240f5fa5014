//! CSV artifacts from DFIR tooling (MFTECmd, KAPE, Plaso exports, …).
//!
//! Column roles are recovered by name matching against the vocabularies
//! the common tools emit; rows become one event each.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::timestamp;
use crate::parser::traits::{extension_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

pub const EVENT_TYPE: &str = "CSVRecord";

const TIMESTAMP_COLUMNS: &[&str] = &[
    "timestamp", "datetime", "time", "date", "eventtime", "event_time",
    "start_time", "end_time", "starttime", "endtime",
    "created0x10", "modified0x10", "lastrecordchange0x10", "lastaccess0x10",
    "created0x30", "modified0x30", "lastrecordchange0x30", "lastaccess0x30",
    "created", "modified", "lastaccess", "lastmodified", "last_modified",
    "visit_time", "last_visit_time", "lastvisittime", "visittime",
    "access_time", "accesstime",
    "date_time",
    "creationtime", "creation_time", "modificationtime", "modification_time",
    "lastaccesstime", "last_access_time", "writetime", "write_time",
    "timecreated", "time_created", "systemtime", "system_time",
    "lastwritetime", "last_write_time",
];

const MESSAGE_COLUMNS: &[&str] = &[
    "message", "msg", "description", "desc", "data", "content", "details",
    "path", "filepath", "file_path", "fullpath", "full_path",
    "filename", "file_name", "name", "parentpath", "parent_path",
    "url", "title", "pagetitle", "page_title",
    "command", "commandline", "command_line", "cmd", "arguments", "args",
    "source_long", "display_name", "parser",
    "source_ip", "dest_ip", "destination", "source", "target",
    "valuename", "value_name", "keypath", "key_path", "valuedata", "value_data",
    "action", "operation", "event", "activity", "type", "status",
];

const SOURCE_COLUMNS: &[&str] = &[
    "source", "source_long", "parser", "log_source", "logsource",
    "category", "type", "event_type", "eventtype",
];

const USER_COLUMNS: &[&str] = &[
    "user", "username", "user_name", "account", "accountname", "account_name",
    "owner", "sid", "usersid", "user_sid",
];

const HOST_COLUMNS: &[&str] = &[
    "host", "hostname", "host_name", "computer", "computername", "computer_name",
    "machine", "machinename", "machine_name", "workstation", "server",
];

fn strip_bom(content: &[u8]) -> &[u8] {
    content.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(content)
}

fn detect_delimiter(content: &[u8]) -> u8 {
    let first_line = content.split(|b| *b == b'\n').next().unwrap_or(b"");
    let commas = first_line.iter().filter(|b| **b == b',').count();
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn match_columns(headers: &[String], vocabulary: &[&str]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, header)| {
            vocabulary
                .iter()
                .any(|name| header.as_str() == *name || header.contains(name))
        })
        .map(|(i, _)| i)
        .collect()
}

fn first_value<'a>(record: &'a csv::StringRecord, columns: &[usize]) -> &'a str {
    columns
        .iter()
        .filter_map(|&i| record.get(i))
        .map(str::trim)
        .find(|v| !v.is_empty() && *v != "-")
        .unwrap_or("")
}

pub struct CsvArtifactParser;

impl EventParser for CsvArtifactParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        extension_lower(path) == "csv"
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let content = fs::read(path).map_err(|e| ParseError::open(path, e))?;
        let content = strip_bom(&content);
        let delimiter = detect_delimiter(content);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::Fields)
            .from_reader(Cursor::new(content));

        let raw_headers = reader
            .headers()
            .map_err(|e| ParseError::malformed("CSV", path, e.to_string()))?
            .clone();
        let headers: Vec<String> = raw_headers
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let timestamp_cols = match_columns(&headers, TIMESTAMP_COLUMNS);
        let mut message_cols = match_columns(&headers, MESSAGE_COLUMNS);
        let source_cols = match_columns(&headers, SOURCE_COLUMNS);
        let user_cols = match_columns(&headers, USER_COLUMNS);
        let host_cols = match_columns(&headers, HOST_COLUMNS);

        if timestamp_cols.is_empty() {
            debug!(file = %path.display(), "no timestamp column detected in CSV");
        }
        // Without a recognised message column, everything that is not a
        // timestamp becomes part of the message.
        if message_cols.is_empty() {
            message_cols = (0..headers.len())
                .filter(|i| !timestamp_cols.contains(i))
                .collect();
        }

        debug!(
            file = %path.display(),
            timestamp_cols = ?timestamp_cols,
            message_cols = message_cols.len(),
            "CSV column mapping"
        );

        let mut events = Vec::new();
        let mut row_num: i64 = 1; // header was row 1

        for record in reader.records() {
            let record = record.map_err(|e| ParseError::malformed("CSV", path, e.to_string()))?;
            row_num += 1;
            if row_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }

            let ts = timestamp_cols
                .iter()
                .filter_map(|&i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty() && *v != "-")
                .find_map(timestamp::parse_flexible)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            let message = if message_cols.len() > 1 {
                message_cols
                    .iter()
                    .filter_map(|&i| {
                        let value = record.get(i)?.trim();
                        if value.is_empty() || value == "-" {
                            return None;
                        }
                        Some(format!("{}={}", raw_headers.get(i).unwrap_or(""), value))
                    })
                    .collect::<Vec<_>>()
                    .join(" | ")
            } else {
                first_value(&record, &message_cols).to_string()
            };

            let event_type = match first_value(&record, &source_cols) {
                "" => EVENT_TYPE.to_string(),
                value => value.to_string(),
            };

            events.push(Event::new(
                ts,
                source.clone(),
                event_type,
                row_num,
                first_value(&record, &user_cols),
                first_value(&record, &host_cols),
                message,
                path_str.clone(),
            ));
        }

        info!(file = %path.display(), events = events.len(), "parsed CSV artifact");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "csv-artifact"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, name: &str, body: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body).unwrap();
        path
    }

    #[test]
    fn test_can_parse_only_csv() {
        let cache = HeaderCache::new();
        assert!(CsvArtifactParser.can_parse(Path::new("mft.csv"), &cache));
        assert!(!CsvArtifactParser.can_parse(Path::new("mft.tsv"), &cache));
    }

    #[test]
    fn test_basic_columns() {
        let dir = TempDir::new().unwrap();
        let body = b"Timestamp,Username,Hostname,Message\n2023-04-21T15:30:45Z,alice,ws01,logged in\n";
        let path = fixture(&dir, "events.csv", body);
        let events = CsvArtifactParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap()
        );
        assert_eq!(event.user, "alice");
        assert_eq!(event.host, "ws01");
        assert!(event.message.contains("logged in"));
        assert_eq!(event.event_id, 2);
    }

    #[test]
    fn test_bom_and_semicolon_delimiter() {
        let dir = TempDir::new().unwrap();
        let mut body = vec![0xEF, 0xBB, 0xBF];
        body.extend_from_slice(b"timestamp;message\n2023-04-21 15:30:45;hello\n");
        let path = fixture(&dir, "export.csv", &body);
        let events = CsvArtifactParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "hello");
        assert!(!events[0].has_sentinel_timestamp());
    }

    #[test]
    fn test_filetime_numeric_timestamp() {
        let dir = TempDir::new().unwrap();
        let body = b"created0x10,filename\n132539328000000000,evil.exe\n";
        let path = fixture(&dir, "mft.csv", body);
        let events = CsvArtifactParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(events[0].message.contains("evil.exe"));
    }

    #[test]
    fn test_source_column_becomes_event_type() {
        let dir = TempDir::new().unwrap();
        let body = b"datetime,source,message\n2023-04-21T15:30:45Z,WinPrefetch,app ran\n";
        let path = fixture(&dir, "plaso.csv", body);
        let events = CsvArtifactParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events[0].event_type, "WinPrefetch");
    }

    #[test]
    fn test_missing_timestamp_keeps_sentinel() {
        let dir = TempDir::new().unwrap();
        let body = b"name,value\nfoo,bar\n";
        let path = fixture(&dir, "kv.csv", body);
        let events = CsvArtifactParser.parse(&path, &CancelToken::new()).unwrap();
        assert!(events[0].has_sentinel_timestamp());
    }
}
