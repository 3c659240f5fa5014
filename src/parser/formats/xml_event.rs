//! Exported Windows Event Log XML (wevtutil / `Get-WinEvent -AsXML`).
//!
//! The token-level extractor here is shared with the Sysmon parser,
//! which consumes the same `<Event>` element shape.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlToken};
use quick_xml::Reader;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::timestamp;
use crate::parser::traits::{extension_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

pub const EVENT_TYPE_FALLBACK: &str = "WindowsEventXML";

pub const EVENT_SCHEMA_URL: &str = "http://schemas.microsoft.com/win/2004/08/events/event";

/// One `<Event>` element reduced to the fields the converters need.
#[derive(Debug, Default, Clone)]
pub struct WinEventRecord {
    pub system_time: String,
    pub event_id: i64,
    pub provider: String,
    pub channel: String,
    pub computer: String,
    pub user_id: String,
    pub level: i32,
    pub event_data: Vec<(String, String)>,
}

impl WinEventRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        timestamp::parse_flexible(&self.system_time).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn level_description(&self) -> &'static str {
        match self.level {
            0 => "LogAlways",
            1 => "Critical",
            2 => "Error",
            3 => "Warning",
            4 => "Information",
            5 => "Verbose",
            _ => "",
        }
    }

    pub fn data(&self, name: &str) -> &str {
        self.event_data
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }
}

fn attr_value(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

/// Stream `<Event>` elements out of an XML export, invoking `on_record`
/// for each completed record. Returns the number of token-level errors
/// tolerated before the stream had to stop.
pub fn stream_win_events(
    path: &Path,
    cancel: &CancelToken,
    mut on_record: impl FnMut(WinEventRecord),
) -> Result<usize, ParseError> {
    let file = File::open(path).map_err(|e| ParseError::open(path, e))?;
    let mut reader = Reader::from_reader(BufReader::new(file));

    let mut buf = Vec::new();
    let mut element_stack: Vec<String> = Vec::new();
    let mut record: Option<WinEventRecord> = None;
    let mut pending_data_name: Option<String> = None;
    let mut errors = 0usize;
    let mut tokens = 0usize;

    loop {
        tokens += 1;
        if tokens % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(ParseError::Cancelled(path.to_path_buf()));
        }

        match reader.read_event_into(&mut buf) {
            Ok(XmlToken::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                handle_element_open(&element, &name, &mut record, &mut pending_data_name);
                element_stack.push(name);
            }
            Ok(XmlToken::Empty(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                handle_element_open(&element, &name, &mut record, &mut pending_data_name);
            }
            Ok(XmlToken::Text(text)) => {
                if let Some(current) = record.as_mut() {
                    let value = text
                        .unescape()
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default();
                    if value.is_empty() {
                        buf.clear();
                        continue;
                    }
                    match element_stack.last().map(String::as_str) {
                        Some("EventID") => current.event_id = value.parse().unwrap_or(0),
                        Some("Computer") => current.computer = value,
                        Some("Channel") => current.channel = value,
                        Some("Level") => current.level = value.parse().unwrap_or(0),
                        Some("Data") => {
                            if let Some(name) = pending_data_name.take() {
                                current.event_data.push((name, value));
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(XmlToken::End(element)) => {
                element_stack.pop();
                if element.name().as_ref() == b"Event" {
                    if let Some(done) = record.take() {
                        on_record(done);
                    }
                    pending_data_name = None;
                }
            }
            Ok(XmlToken::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                // quick-xml cannot reliably resync after a syntax error.
                warn!(file = %path.display(), error = %err, "stopping XML stream on parse error");
                errors += 1;
                break;
            }
        }
        buf.clear();
    }

    Ok(errors)
}

fn handle_element_open(
    element: &BytesStart<'_>,
    name: &str,
    record: &mut Option<WinEventRecord>,
    pending_data_name: &mut Option<String>,
) {
    match name {
        "Event" => *record = Some(WinEventRecord::default()),
        "Provider" => {
            if let (Some(current), Some(value)) = (record.as_mut(), attr_value(element, b"Name")) {
                current.provider = value;
            }
        }
        "TimeCreated" => {
            if let (Some(current), Some(value)) =
                (record.as_mut(), attr_value(element, b"SystemTime"))
            {
                current.system_time = value;
            }
        }
        "Security" => {
            if let (Some(current), Some(value)) = (record.as_mut(), attr_value(element, b"UserID"))
            {
                current.user_id = value;
            }
        }
        "Data" => {
            if record.is_some() {
                *pending_data_name = attr_value(element, b"Name");
            }
        }
        _ => {}
    }
}

// ── Parser ──────────────────────────────────────────────────────

pub struct WindowsXmlEventParser;

impl WindowsXmlEventParser {
    fn convert(&self, record: &WinEventRecord, source: &str, path: &str) -> Event {
        let event_type = if !record.channel.is_empty() {
            record.channel.clone()
        } else if !record.provider.is_empty() {
            record.provider.clone()
        } else {
            EVENT_TYPE_FALLBACK.to_string()
        };

        let mut parts = vec![format!("EventID: {}", record.event_id)];
        if !record.provider.is_empty() {
            parts.push(format!("Provider: {}", record.provider));
        }
        let level = record.level_description();
        if !level.is_empty() {
            parts.push(format!("Level: {level}"));
        }
        let data_fields: Vec<String> = record
            .event_data
            .iter()
            .map(|(name, value)| {
                let mut value = value.trim().to_string();
                if value.len() > 100 {
                    value.truncate(97);
                    value.push_str("...");
                }
                format!("{name}={value}")
            })
            .collect();
        if !data_fields.is_empty() {
            parts.push(data_fields.join(", "));
        }

        Event::new(
            record.timestamp(),
            source,
            event_type,
            record.event_id,
            record.user_id.clone(),
            record.computer.clone(),
            parts.join(" | "),
            path,
        )
    }
}

impl EventParser for WindowsXmlEventParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        if extension_lower(path) != "xml" {
            return false;
        }
        cache.header_contains(path, &[EVENT_SCHEMA_URL])
            || cache.header_contains(path, &["<Event", "<System>"])
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let errors = stream_win_events(path, cancel, |record| {
            events.push(self.convert(&record, &source, &path_str));
        })?;

        info!(
            file = %path.display(),
            events = events.len(),
            errors,
            "parsed Windows event XML"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "windows-xml-event"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    const EXPORT: &str = r#"<?xml version="1.0"?>
<Events>
  <Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">
    <System>
      <Provider Name="Microsoft-Windows-Security-Auditing" Guid="{5478}"/>
      <EventID>4624</EventID>
      <Level>4</Level>
      <TimeCreated SystemTime="2023-04-21T15:30:45.123Z"/>
      <Channel>Security</Channel>
      <Computer>WIN-SRV01</Computer>
      <Security UserID="S-1-5-18"/>
    </System>
    <EventData>
      <Data Name="TargetUserName">Administrator</Data>
      <Data Name="LogonType">10</Data>
    </EventData>
  </Event>
  <Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">
    <System>
      <Provider Name="Microsoft-Windows-Security-Auditing"/>
      <EventID>4634</EventID>
      <Level>4</Level>
      <TimeCreated SystemTime="2023-04-21T15:31:00Z"/>
      <Channel>Security</Channel>
      <Computer>WIN-SRV01</Computer>
    </System>
  </Event>
</Events>
"#;

    fn fixture(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_can_parse_by_schema() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "security.xml", EXPORT);
        let cache = HeaderCache::new();
        assert!(WindowsXmlEventParser.can_parse(&path, &cache));

        let other = fixture(&dir, "random.xml", "<root><child/></root>");
        assert!(!WindowsXmlEventParser.can_parse(&other, &cache));
    }

    #[test]
    fn test_streams_all_events() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "security.xml", EXPORT);
        let events = WindowsXmlEventParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 2);

        let logon = &events[0];
        assert_eq!(logon.event_type, "Security");
        assert_eq!(logon.event_id, 4624);
        assert_eq!(logon.host, "WIN-SRV01");
        assert_eq!(logon.user, "S-1-5-18");
        assert_eq!(
            logon.timestamp,
            Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap()
                + chrono::Duration::milliseconds(123)
        );
        assert!(logon.message.contains("EventID: 4624"));
        assert!(logon.message.contains("Level: Information"));
        assert!(logon.message.contains("TargetUserName=Administrator"));
        assert!(logon.message.contains("LogonType=10"));

        assert_eq!(events[1].event_id, 4634);
    }

    #[test]
    fn test_missing_time_is_sentinel() {
        let dir = TempDir::new().unwrap();
        let body = r#"<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event"><System><EventID>1</EventID></System></Event>"#;
        let path = fixture(&dir, "minimal.xml", body);
        let events = WindowsXmlEventParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].has_sentinel_timestamp());
    }
}
